//! Persistent, Redis-backed job queue : sorted-set priority encoding,
//! per-job records with a TTL, and a poll-driven worker pool.
//!
//! Grounded on `other_examples/.../nx-playground/libs/core/stream-worker/
//! src/worker.rs`'s worker-loop shape (`Semaphore` + `JoinSet` concurrency,
//! exponential backoff on connection errors, retry-vs-DLQ error handling)
//! adapted from its `XADD`/`XACK` stream primitives to `ZADD`/`ZPOPMIN`
//! sorted-set primitives, since this queue has no consumer-group / ack
//! semantics — a dequeue mutates the job record directly. `redis` itself
//! (`tokio-comp`, `connection-manager` features) is carried from
//! `other_examples/manifests/flowcatalyst-flowcatalyst/Cargo.toml`, the
//! teacher workspace having no Redis dependency of its own.

#[ allow( clippy::missing_inline_in_public_items ) ]
mod private
{
  use crate::error::{ RuntimeError, RuntimeResult };
  use redis::AsyncCommands;
  use serde::{ Deserialize, Serialize };
  use std::sync::Arc;
  use std::time::{ Duration, SystemTime, UNIX_EPOCH };
  use tokio::sync::Semaphore;
  use tokio::task::JoinSet;
  use tokio_util::sync::CancellationToken;

  /// A job's position in its state machine.
  #[ derive( Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize ) ]
  #[ serde( rename_all = "snake_case" ) ]
  pub enum JobStatus
  {
    /// Enqueued, not yet dequeued by a worker.
    Pending,
    /// Dequeued and currently executing.
    Processing,
    /// Finished successfully; terminal.
    Completed,
    /// Exhausted its retry budget; terminal.
    Failed,
    /// Failed with budget remaining, scheduled for a future retry.
    Retrying,
    /// Withdrawn before execution; terminal.
    Cancelled,
  }

  /// A persistent unit of work.
  ///
  /// Invariant : `attempts <= max_retries + 1`, enforced by [`fail`] moving a
  /// job to `Failed` rather than `Retrying` once the budget is spent.
  #[ derive( Debug, Clone, Serialize, Deserialize ) ]
  pub struct Job
  {
    /// Unique identifier, assigned at first enqueue if absent.
    pub id : String,
    /// Caller-defined type tag, used to route to the matching handler.
    pub job_type : String,
    /// Logical queue name (`<prefix>:queue:<name>`'s `<name>`).
    pub queue : String,
    /// Priority; higher numeric value = higher priority (spec's stated convention).
    pub priority : i64,
    /// Opaque payload.
    pub payload : serde_json::Value,
    /// Unix-epoch seconds at first enqueue.
    pub created_at : u64,
    /// Unix-epoch seconds before which this job must not be dequeued.
    pub scheduled_at : u64,
    /// Unix-epoch seconds a worker picked this job up, if ever.
    pub started_at : Option< u64 >,
    /// Unix-epoch seconds this job reached a terminal success state, if ever.
    pub completed_at : Option< u64 >,
    /// Unix-epoch seconds this job reached a terminal failure state, if ever.
    pub failed_at : Option< u64 >,
    /// Dequeue attempts made so far, including the one in progress.
    pub attempts : u32,
    /// Maximum retries permitted beyond the first attempt.
    pub max_retries : u32,
    /// The most recent handler error, if any.
    pub last_error : Option< String >,
    /// Opaque handler result, present once `status` is `Completed`.
    pub result : Option< serde_json::Value >,
    /// Current state.
    pub status : JobStatus,
  }

  impl Job
  {
    /// Construct a new, unscheduled pending job for `queue`.
    #[ must_use ]
    #[ inline ]
    pub fn new( job_type : impl Into< String >, queue : impl Into< String >, priority : i64, payload : serde_json::Value ) -> Self
    {
      let now = now_secs();
      Self
      {
        id : uuid::Uuid::new_v4().to_string(),
        job_type : job_type.into(),
        queue : queue.into(),
        priority,
        payload,
        created_at : now,
        scheduled_at : now,
        started_at : None,
        completed_at : None,
        failed_at : None,
        attempts : 0,
        max_retries : 3,
        last_error : None,
        result : None,
        status : JobStatus::Pending,
      }
    }

    /// Override the retry budget (default 3).
    #[ must_use ]
    #[ inline ]
    pub fn with_max_retries( mut self, max_retries : u32 ) -> Self
    {
      self.max_retries = max_retries;
      self
    }
  }

  fn now_secs() -> u64
  {
    SystemTime::now().duration_since( UNIX_EPOCH ).map( | d | d.as_secs() ).unwrap_or_default()
  }

  /// Score a job so that `ZPOPMIN` returns higher-priority, earlier-scheduled
  /// jobs first. The spec permits either priority convention as long as the
  /// score function agrees with it; here priority is inverted by subtracting
  /// from a constant ceiling well above any priority value in practice.
  fn score( job : &Job ) -> f64
  {
    const PRIORITY_CEILING : i64 = 1_000_000;
    let inversion = ( PRIORITY_CEILING - job.priority ).max( 0 ) as f64;
    inversion + ( job.scheduled_at as f64 ) / 1_000_000.0
  }

  /// Tuning parameters for a [`JobQueueClient`].
  #[ derive( Debug, Clone, PartialEq ) ]
  pub struct JobQueueConfig
  {
    /// Key prefix namespacing every queue and job record.
    pub key_prefix : String,
    /// TTL applied to a job record, refreshed on every write.
    pub job_ttl : Duration,
    /// Delay before a failed-but-retryable job becomes eligible again.
    pub retry_delay : Duration,
    /// Worker poll interval when a queue appears empty.
    pub poll_interval : Duration,
    /// Per-job execution deadline, enforced via the handler's cancellation context.
    pub job_timeout : Duration,
    /// Fixed worker pool size.
    pub worker_count : usize,
  }

  impl Default for JobQueueConfig
  {
    #[ inline ]
    fn default() -> Self
    {
      Self
      {
        key_prefix : "llm_runtime".to_string(),
        job_ttl : Duration::from_secs( 3600 ),
        retry_delay : Duration::from_secs( 30 ),
        poll_interval : Duration::from_secs( 1 ),
        job_timeout : Duration::from_secs( 60 ),
        worker_count : 4,
      }
    }
  }

  /// Thin Redis-backed client implementing the enqueue/dequeue/complete/fail
  /// state machine. Cheap to clone — wraps a `ConnectionManager`, itself a
  /// cheaply-cloned, auto-reconnecting handle.
  #[ derive( Debug, Clone ) ]
  pub struct JobQueueClient
  {
    connection : redis::aio::ConnectionManager,
    config : JobQueueConfig,
  }

  impl JobQueueClient
  {
    /// Connect to `redis_url` and build a client bound to `config`.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::JobQueue`] if the connection cannot be
    /// established.
    pub async fn connect( redis_url : &str, config : JobQueueConfig ) -> RuntimeResult< Self >
    {
      let client = redis::Client::open( redis_url ).map_err( RuntimeError::from )?;
      let connection = client.get_connection_manager().await.map_err( RuntimeError::from )?;
      Ok( Self { connection, config } )
    }

    fn queue_key( &self, queue : &str ) -> String
    {
      format!( "{}:queue:{queue}", self.config.key_prefix )
    }

    fn job_key( &self, id : &str ) -> String
    {
      format!( "{}:job:{id}", self.config.key_prefix )
    }

    /// Enqueue `job`, assigning defaults and marking it `Pending`.
    ///
    /// Not atomic : the sorted-set member and the job record are two
    /// separate commands. A crash between them can leak a queue entry with
    /// no job record; a dequeuing worker treats the resulting deserialization
    /// failure as a skip, not a crash.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::JobQueue`] on any Redis failure, or
    /// [`RuntimeError::Serialization`] if `job` cannot be encoded.
    pub async fn enqueue( &self, mut job : Job ) -> RuntimeResult< String >
    {
      job.status = JobStatus::Pending;
      let id = job.id.clone();
      let queue_key = self.queue_key( &job.queue );
      let job_key = self.job_key( &id );
      let encoded = serde_json::to_string( &job )?;
      let job_score = score( &job );

      let mut connection = self.connection.clone();
      connection.zadd::< _, _, _, () >( &queue_key, &encoded, job_score ).await.map_err( RuntimeError::from )?;
      connection.set_ex::< _, _, () >( &job_key, &encoded, self.config.job_ttl.as_secs().max( 1 ) ).await.map_err( RuntimeError::from )?;
      Ok( id )
    }

    /// Pop the highest-priority, earliest-eligible job from `queue`, if any,
    /// transitioning it to `Processing`.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::JobQueue`] on Redis failure.
    pub async fn dequeue( &self, queue : &str ) -> RuntimeResult< Option< Job > >
    {
      let queue_key = self.queue_key( queue );
      let mut connection = self.connection.clone();
      let popped : Vec< ( String, f64 ) > = connection.zpopmin( &queue_key, 1 ).await.map_err( RuntimeError::from )?;
      let Some( ( encoded, _ ) ) = popped.into_iter().next() else { return Ok( None ) };

      let Ok( mut job ) = serde_json::from_str::< Job >( &encoded ) else { return Ok( None ) };
      job.status = JobStatus::Processing;
      job.started_at = Some( now_secs() );
      job.attempts += 1;
      self.persist( &job ).await?;
      Ok( Some( job ) )
    }

    /// Mark `job` `Completed` with `result`, persisting the final record.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::JobQueue`] on Redis failure.
    pub async fn complete( &self, mut job : Job, result : serde_json::Value ) -> RuntimeResult< () >
    {
      job.status = JobStatus::Completed;
      job.completed_at = Some( now_secs() );
      job.result = Some( result );
      self.persist( &job ).await
    }

    /// Record `error` against `job` : re-enqueue as `Retrying` if the retry
    /// budget permits, otherwise mark `Failed`.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::JobQueue`] on Redis failure.
    pub async fn fail( &self, mut job : Job, error : impl Into< String > ) -> RuntimeResult< () >
    {
      job.last_error = Some( error.into() );
      if job.attempts <= job.max_retries
      {
        job.status = JobStatus::Retrying;
        job.scheduled_at = now_secs() + self.config.retry_delay.as_secs();
        self.persist( &job ).await?;
        let queue_key = self.queue_key( &job.queue );
        let encoded = serde_json::to_string( &job )?;
        let mut connection = self.connection.clone();
        connection.zadd::< _, _, _, () >( &queue_key, &encoded, score( &job ) ).await.map_err( RuntimeError::from )?;
        Ok( () )
      }
      else
      {
        job.status = JobStatus::Failed;
        job.failed_at = Some( now_secs() );
        self.persist( &job ).await
      }
    }

    async fn persist( &self, job : &Job ) -> RuntimeResult< () >
    {
      let job_key = self.job_key( &job.id );
      let encoded = serde_json::to_string( job )?;
      let mut connection = self.connection.clone();
      connection.set_ex::< _, _, () >( &job_key, encoded, self.config.job_ttl.as_secs().max( 1 ) ).await.map_err( RuntimeError::from )?;
      Ok( () )
    }

    /// Fetch the current record for `id`, if its TTL has not yet expired.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::JobQueue`] on Redis failure.
    pub async fn get( &self, id : &str ) -> RuntimeResult< Option< Job > >
    {
      let job_key = self.job_key( id );
      let mut connection = self.connection.clone();
      let raw : Option< String > = connection.get( &job_key ).await.map_err( RuntimeError::from )?;
      Ok( raw.and_then( | encoded | serde_json::from_str( &encoded ).ok() ) )
    }
  }

  /// Invoked once per dequeued job of the handler's advertised type.
  #[ async_trait::async_trait ]
  pub trait JobHandler : Send + Sync
  {
    /// The job type this handler processes (matches [`Job::job_type`]).
    fn job_type( &self ) -> &str;

    /// The logical queue this handler polls.
    fn queue( &self ) -> &str;

    /// Execute `job`, returning its result payload or an error to drive the
    /// retry-or-fail decision. `cancellation` resolves once the job's
    /// `job_timeout` deadline elapses.
    async fn handle( &self, job : &Job, cancellation : CancellationToken ) -> RuntimeResult< serde_json::Value >;
  }

  /// Polls one or more [`JobHandler`]s against a [`JobQueueClient`] with a
  /// fixed-size worker pool, per handler.
  #[ derive( Debug ) ]
  pub struct JobQueueWorker
  {
    client : JobQueueClient,
  }

  impl JobQueueWorker
  {
    /// Bind a worker to an already-connected client.
    #[ must_use ]
    #[ inline ]
    pub fn new( client : JobQueueClient ) -> Self
    {
      Self { client }
    }

    /// Run `handler`'s poll loop until `shutdown` is cancelled, processing
    /// up to `worker_count` jobs concurrently via a semaphore-gated
    /// `JoinSet`.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::JobQueue`] only if dequeuing itself fails
    /// persistently; individual handler failures are routed through
    /// [`JobQueueClient::fail`] and do not stop the loop.
    pub async fn run( &self, handler : Arc< dyn JobHandler >, shutdown : CancellationToken ) -> RuntimeResult< () >
    {
      let semaphore = Arc::new( Semaphore::new( self.client.config.worker_count.max( 1 ) ) );
      let mut tasks : JoinSet< () > = JoinSet::new();
      let job_timeout = self.client.config.job_timeout;
      let poll_interval = self.client.config.poll_interval;

      loop
      {
        if shutdown.is_cancelled()
        {
          break;
        }

        match self.client.dequeue( handler.queue() ).await
        {
          Ok( Some( job ) ) if job.job_type == handler.job_type() =>
          {
            let permit = semaphore.clone().acquire_owned().await
              .map_err( | _ | RuntimeError::JobQueue( "worker semaphore closed".to_string() ) )?;
            let client = self.client.clone();
            let handler = handler.clone();
            let job_cancellation = CancellationToken::new();
            let deadline_cancellation = job_cancellation.clone();

            tasks.spawn( async move
            {
              let _permit = permit;
              tokio::select!
              {
                () = tokio::time::sleep( job_timeout ) => deadline_cancellation.cancel(),
                outcome = handler.handle( &job, job_cancellation.clone() ) =>
                {
                  job_cancellation.cancel();
                  match outcome
                  {
                    Ok( result ) =>
                    {
                      if let Err( error ) = client.complete( job, result ).await
                      {
                        tracing::error!( error = %error, "failed to persist job completion" );
                      }
                    }
                    Err( error ) =>
                    {
                      tracing::warn!( job_id = %job.id, error = %error, "job handler failed" );
                      if let Err( persist_error ) = client.fail( job, error.to_string() ).await
                      {
                        tracing::error!( error = %persist_error, "failed to persist job failure" );
                      }
                    }
                  }
                }
              }
            } );
          }
          Ok( Some( mismatched ) ) =>
          {
            tracing::warn!( job_id = %mismatched.id, job_type = %mismatched.job_type, expected = %handler.job_type(), "dequeued job of unexpected type, re-enqueuing" );
            if let Err( error ) = self.client.enqueue( mismatched ).await
            {
              tracing::error!( error = %error, "failed to re-enqueue mismatched job" );
            }
          }
          Ok( None ) => tokio::time::sleep( poll_interval ).await,
          Err( error ) =>
          {
            tracing::warn!( error = %error, "dequeue failed, backing off" );
            tokio::time::sleep( poll_interval ).await;
          }
        }

        while tasks.try_join_next().is_some() {}
      }

      while tasks.join_next().await.is_some() {}
      Ok( () )
    }
  }

  #[ cfg( test ) ]
  mod tests
  {
    use super::*;

    #[ test ]
    fn job_new_starts_pending_with_one_attempt_budgeted()
    {
      let job = Job::new( "embed", "default", 5, serde_json::json!( { "text" : "hi" } ) );
      assert_eq!( job.status, JobStatus::Pending );
      assert_eq!( job.attempts, 0 );
      assert_eq!( job.max_retries, 3 );
    }

    #[ test ]
    fn higher_priority_yields_lower_score()
    {
      let low = Job::new( "embed", "default", 1, serde_json::Value::Null );
      let high = Job::new( "embed", "default", 9, serde_json::Value::Null );
      assert!( score( &high ) < score( &low ) );
    }

    #[ test ]
    fn with_max_retries_overrides_default()
    {
      let job = Job::new( "embed", "default", 0, serde_json::Value::Null ).with_max_retries( 1 );
      assert_eq!( job.max_retries, 1 );
    }

    #[ test ]
    fn default_config_matches_documented_values()
    {
      let config = JobQueueConfig::default();
      assert_eq!( config.worker_count, 4 );
      assert_eq!( config.retry_delay, Duration::from_secs( 30 ) );
    }
  }

} // end mod private

crate::mod_interface!
{
  exposed use
  {
    Job,
    JobStatus,
    JobQueueConfig,
    JobQueueClient,
    JobHandler,
    JobQueueWorker,
  };
}
