//! Bounded, strictly-prioritized request queue with a fixed worker pool.
//!
//! Grounded on the `JoinSet` + `Semaphore` worker-pool shape of
//! `other_examples`' `stream-worker` crate, adapted from a Redis-stream
//! consumer loop to an in-process queue : workers repeatedly scan priority
//! levels from highest (index 0) to lowest and run whatever they find,
//! parking on a `Notify` when every level is empty. Heterogeneous result
//! types are erased behind a boxed job that completes its own `oneshot`
//! sender, so one queue instance serves every capability call regardless of
//! its response type.

#[ allow( clippy::missing_inline_in_public_items ) ]
mod private
{
  use crate::error::RuntimeError;
  use crate::pipeline::CancellationContext;
  use std::collections::VecDeque;
  use std::future::Future;
  use std::pin::Pin;
  use std::sync::atomic::{ AtomicUsize, Ordering };
  use std::sync::{ Arc, Mutex };
  use std::time::{ Duration, Instant };
  use tokio::sync::{ oneshot, Notify };
  use tokio::task::JoinSet;

  type BoxedJob = Box< dyn FnOnce( bool ) -> Pin< Box< dyn Future< Output = () > + Send > > + Send >;

  /// Tuning parameters for a [`PriorityRequestQueue`].
  #[ derive( Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize ) ]
  pub struct PriorityQueueConfig
  {
    /// Number of strict-priority levels; `priority` is clamped to `0..num_priority_levels`.
    pub num_priority_levels : u8,
    /// Maximum total queued (not yet running) jobs across all levels.
    pub max_queue_size : usize,
    /// Fixed worker pool size.
    pub worker_count : usize,
    /// Maximum time a job may wait queued before a worker treats it as expired.
    pub max_wait : Duration,
  }

  impl Default for PriorityQueueConfig
  {
    #[ inline ]
    fn default() -> Self
    {
      Self { num_priority_levels : 3, max_queue_size : 100, worker_count : 5, max_wait : Duration::from_secs( 60 ) }
    }
  }

  struct QueuedJob
  {
    enqueued_at : Instant,
    run : BoxedJob,
  }

  struct QueueState
  {
    levels : Mutex< Vec< VecDeque< QueuedJob > > >,
    notify : Notify,
    queued_count : AtomicUsize,
    max_queue_size : usize,
    max_wait : Duration,
  }

  impl QueueState
  {
    fn pop_highest( &self ) -> Option< QueuedJob >
    {
      let mut levels = self.levels.lock().unwrap_or_else( std::sync::PoisonError::into_inner );
      levels.iter_mut().find_map( std::collections::VecDeque::pop_front )
    }
  }

  /// A bounded, strictly-prioritized FIFO queue with a fixed-size worker
  /// pool, admitting jobs of any result type.
  pub struct PriorityRequestQueue
  {
    state : Arc< QueueState >,
    workers : JoinSet< () >,
  }

  impl std::fmt::Debug for PriorityRequestQueue
  {
    #[ inline ]
    fn fmt( &self, formatter : &mut std::fmt::Formatter< '_ > ) -> std::fmt::Result
    {
      formatter.debug_struct( "PriorityRequestQueue" ).field( "workers", &self.workers.len() ).finish()
    }
  }

  impl PriorityRequestQueue
  {
    /// Construct a queue and spawn its fixed worker pool.
    #[ must_use ]
    pub fn new( config : PriorityQueueConfig ) -> Self
    {
      let num_levels = core::cmp::max( 1, config.num_priority_levels as usize );
      let state = Arc::new( QueueState
      {
        levels : Mutex::new( ( 0..num_levels ).map( | _ | VecDeque::new() ).collect() ),
        notify : Notify::new(),
        queued_count : AtomicUsize::new( 0 ),
        max_queue_size : config.max_queue_size,
        max_wait : config.max_wait,
      } );

      let mut workers = JoinSet::new();
      for _ in 0..core::cmp::max( 1, config.worker_count )
      {
        let state = state.clone();
        workers.spawn( async move
        {
          loop
          {
            let job = loop
            {
              if let Some( job ) = state.pop_highest()
              {
                state.queued_count.fetch_sub( 1, Ordering::SeqCst );
                break job;
              }
              state.notify.notified().await;
            };
            let expired = job.enqueued_at.elapsed() > state.max_wait;
            ( job.run )( expired ).await;
          }
        } );
      }

      Self { state, workers }
    }

    /// Submit `job` at `priority` (clamped to the configured level count,
    /// `0` = highest), awaiting its result.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::QueueFull`] if the queue is already at capacity,
    /// [`RuntimeError::QueueTimeout`] if a worker picks it up only after it
    /// has waited longer than the configured maximum, and
    /// [`RuntimeError::Cancelled`] if `ctx` cancels first (the job, if
    /// already queued, still runs to completion but its result is discarded).
    pub async fn execute< T, F, Fut >( &self, ctx : &CancellationContext, priority : u8, job : F ) -> Result< T, RuntimeError >
    where
      F : FnOnce() -> Fut + Send + 'static,
      Fut : Future< Output = Result< T, RuntimeError > > + Send + 'static,
      T : Send + 'static,
    {
      let ( tx, rx ) = oneshot::channel::< Result< T, RuntimeError > >();
      let boxed : BoxedJob = Box::new( move | expired : bool |
      {
        Box::pin( async move
        {
          if expired
          {
            let _ = tx.send( Err( RuntimeError::QueueTimeout ) );
            return;
          }
          let result = job().await;
          let _ = tx.send( result );
        } )
      } );

      self.enqueue( priority, boxed )?;

      tokio::select!
      {
        biased;
        () = ctx.cancelled() => Err( RuntimeError::Cancelled ),
        received = rx => match received
        {
          Ok( result ) => result,
          Err( _recv_error ) => Err( RuntimeError::Cancelled ),
        },
      }
    }

    fn enqueue( &self, priority : u8, job : BoxedJob ) -> Result< (), RuntimeError >
    {
      let pending = self.state.queued_count.fetch_add( 1, Ordering::SeqCst ) + 1;
      if pending > self.state.max_queue_size
      {
        self.state.queued_count.fetch_sub( 1, Ordering::SeqCst );
        return Err( RuntimeError::QueueFull );
      }
      {
        let mut levels = self.state.levels.lock().unwrap_or_else( std::sync::PoisonError::into_inner );
        let level = ( priority as usize ).min( levels.len() - 1 );
        levels[ level ].push_back( QueuedJob { enqueued_at : Instant::now(), run : job } );
      }
      self.state.notify.notify_one();
      Ok( () )
    }

    /// Number of jobs currently queued (not yet picked up by a worker).
    #[ must_use ]
    #[ inline ]
    pub fn queued_len( &self ) -> usize
    {
      self.state.queued_count.load( Ordering::SeqCst )
    }
  }

  #[ cfg( test ) ]
  mod tests
  {
    use super::{ PriorityRequestQueue, PriorityQueueConfig };
    use crate::pipeline::CancellationContext;
    use std::sync::atomic::{ AtomicU32, Ordering };
    use std::sync::Arc;

    #[ tokio::test ]
    async fn higher_priority_job_runs_before_lower_priority_queued_earlier()
    {
      let queue = Arc::new( PriorityRequestQueue::new( PriorityQueueConfig { worker_count : 1, ..PriorityQueueConfig::default() } ) );
      let order = Arc::new( std::sync::Mutex::new( Vec::< u8 >::new() ) );
      let ctx = CancellationContext::new();

      // Block the single worker on a low-priority job until both are queued.
      let gate = Arc::new( tokio::sync::Notify::new() );
      let gate_clone = gate.clone();
      let order_clone = order.clone();
      let ctx_a = ctx.clone();
      let queue_a = queue.clone();
      let first = tokio::spawn( async move
      {
        queue_a.execute::< (), _, _ >( &ctx_a, 2, move ||
        {
          let order = order_clone.clone();
          let gate = gate_clone.clone();
          async move { gate.notified().await; order.lock().unwrap().push( 0 ); Ok( () ) }
        } ).await
      } );
      tokio::time::sleep( std::time::Duration::from_millis( 20 ) ).await;

      let order_b = order.clone();
      let ctx_b = ctx.clone();
      let queue_b = queue.clone();
      let second = tokio::spawn( async move
      {
        queue_b.execute::< (), _, _ >( &ctx_b, 2, move || { let order = order_b.clone(); async move { order.lock().unwrap().push( 1 ); Ok( () ) } } ).await
      } );

      let order_c = order.clone();
      let ctx_c = ctx.clone();
      let queue_c = queue.clone();
      let third = tokio::spawn( async move
      {
        queue_c.execute::< (), _, _ >( &ctx_c, 0, move || { let order = order_c.clone(); async move { order.lock().unwrap().push( 2 ); Ok( () ) } } ).await
      } );

      tokio::time::sleep( std::time::Duration::from_millis( 20 ) ).await;
      gate.notify_one();
      first.await.unwrap().unwrap();
      second.await.unwrap().unwrap();
      third.await.unwrap().unwrap();

      let finished = order.lock().unwrap().clone();
      assert_eq!( finished[ 0 ], 0 );
      assert_eq!( finished[ 1 ], 2 );
      assert_eq!( finished[ 2 ], 1 );
    }

    #[ tokio::test ]
    async fn queue_rejects_once_at_capacity()
    {
      let queue = Arc::new( PriorityRequestQueue::new( PriorityQueueConfig { worker_count : 1, max_queue_size : 1, ..PriorityQueueConfig::default() } ) );
      let ctx = CancellationContext::new();
      let calls = Arc::new( AtomicU32::new( 0 ) );

      let gate = Arc::new( tokio::sync::Notify::new() );
      let gate_clone = gate.clone();
      let calls_a = calls.clone();
      let queue_a = queue.clone();
      let ctx_a = ctx.clone();
      let first_handle = tokio::spawn( async move
      {
        queue_a.execute::< (), _, _ >( &ctx_a, 0, move || { calls_a.fetch_add( 1, Ordering::SeqCst ); async move { gate_clone.notified().await; Ok( () ) } } ).await
      } );
      // Give the sole worker time to dequeue and block the first job on `gate`.
      tokio::time::sleep( std::time::Duration::from_millis( 20 ) ).await;

      // With the worker occupied, one job may sit queued (at `max_queue_size`)...
      let queue_b = queue.clone();
      let ctx_b = ctx.clone();
      let second_handle = tokio::spawn( async move { queue_b.execute::< (), _, _ >( &ctx_b, 0, || async { Ok( () ) } ).await } );
      tokio::time::sleep( std::time::Duration::from_millis( 20 ) ).await;

      // ...but a second queued job exceeds capacity and is rejected immediately.
      let result = queue.execute::< (), _, _ >( &ctx, 0, || async { Ok( () ) } ).await;
      assert!( matches!( result, Err( crate::error::RuntimeError::QueueFull ) ) );

      gate.notify_one();
      first_handle.await.unwrap().unwrap();
      second_handle.await.unwrap().unwrap();
    }
  }

} // end mod private

crate::mod_interface!
{
  exposed use
  {
    PriorityQueueConfig,
    PriorityRequestQueue,
  };
}
