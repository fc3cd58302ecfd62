//! Per-provider HTTP client construction and health probing.
//!
//! Grounded on the teacher's `connection_manager.rs` (pool sizing / keep-alive
//! knobs feeding `reqwest::ClientBuilder`) and `health_checks.rs` (stateless
//! probe utilities with healthy/degraded/unhealthy thresholds), collapsed
//! from the teacher's per-host pool-of-pools into one `reqwest::Client` per
//! provider — `reqwest` already pools connections per host internally, so a
//! second pooling layer on top of it is not reproduced here.

#[ allow( clippy::missing_inline_in_public_items ) ]
mod private
{
  use crate::config::{ ConnectionPoolConfig, HealthCheckConfig };
  use crate::error::RuntimeError;
  use std::sync::{ Arc, RwLock };
  use std::time::{ Duration, Instant };

  /// Build a `reqwest::Client` honoring the given pool configuration.
  ///
  /// # Errors
  ///
  /// Returns [`RuntimeError::InvalidConfig`] if the underlying TLS backend
  /// fails to initialize.
  pub fn build_http_client( config : &ConnectionPoolConfig, default_timeout : Duration ) -> Result< reqwest::Client, RuntimeError >
  {
    let mut builder = reqwest::Client::builder()
      .timeout( default_timeout )
      .user_agent( concat!( "llm-runtime/", env!( "CARGO_PKG_VERSION" ) ) )
      .pool_max_idle_per_host( config.max_idle_per_host )
      .pool_idle_timeout( config.idle_timeout )
      .tcp_keepalive( if config.keep_alive { Some( Duration::from_secs( 60 ) ) } else { None } )
      .danger_accept_invalid_certs( !config.tls_verify );

    if !config.http2
    {
      builder = builder.http1_only();
    }

    builder.build().map_err( | error | RuntimeError::InvalidConfig( format!( "failed to build http client : {error}" ) ) )
  }

  /// Health status of a provider endpoint, classified from response latency
  /// once connectivity itself succeeds.
  #[ derive( Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize ) ]
  pub enum HealthStatus
  {
    /// Responding within the degraded threshold.
    Healthy,
    /// Responding, but past the degraded threshold.
    Degraded,
    /// Unreachable, or past the unhealthy threshold.
    Unhealthy,
  }

  /// Outcome of a single probe.
  #[ derive( Debug, Clone, serde::Serialize, serde::Deserialize ) ]
  pub struct HealthCheckResult
  {
    /// The URL probed.
    pub endpoint : String,
    /// Resulting classification.
    pub status : HealthStatus,
    /// Observed round-trip latency.
    pub latency : Duration,
    /// Error detail, if the probe failed outright.
    pub error_message : Option< String >,
  }

  /// Thresholds partitioning probe latency into [`HealthStatus`] buckets.
  #[ derive( Debug, Clone, Copy ) ]
  pub struct HealthThresholds
  {
    /// Latency past which a successful probe is `Degraded`.
    pub degraded : Duration,
    /// Latency past which a successful probe is `Unhealthy`.
    pub unhealthy : Duration,
  }

  impl Default for HealthThresholds
  {
    #[ inline ]
    fn default() -> Self
    {
      Self { degraded : Duration::from_millis( 1000 ), unhealthy : Duration::from_secs( 5 ) }
    }
  }

  /// Stateless probe utility : one health check is one GET against
  /// `base_url` joined with the configured endpoint suffix.
  #[ derive( Debug ) ]
  pub struct HealthChecker;

  impl HealthChecker
  {
    /// Probe `base_url` once through `client`, classifying the result
    /// against `thresholds`.
    pub async fn check( client : &reqwest::Client, base_url : &str, config : &HealthCheckConfig, thresholds : HealthThresholds ) -> HealthCheckResult
    {
      let endpoint = format!( "{}{}", base_url.trim_end_matches( '/' ), config.endpoint_suffix );
      let started_at = Instant::now();
      let outcome = tokio::time::timeout( config.timeout, client.get( &endpoint ).send() ).await;
      let latency = started_at.elapsed();

      match outcome
      {
        Ok( Ok( response ) ) if response.status().is_success() || response.status().is_client_error() =>
        {
          let status = if latency >= thresholds.unhealthy { HealthStatus::Unhealthy }
            else if latency >= thresholds.degraded { HealthStatus::Degraded }
            else { HealthStatus::Healthy };
          HealthCheckResult { endpoint, status, latency, error_message : None }
        }
        Ok( Ok( response ) ) =>
        {
          HealthCheckResult { endpoint, status : HealthStatus::Unhealthy, latency, error_message : Some( format!( "http {}", response.status() ) ) }
        }
        Ok( Err( error ) ) =>
        {
          HealthCheckResult { endpoint, status : HealthStatus::Unhealthy, latency, error_message : Some( error.to_string() ) }
        }
        Err( _elapsed ) =>
        {
          HealthCheckResult { endpoint, status : HealthStatus::Unhealthy, latency, error_message : Some( "probe timed out".to_string() ) }
        }
      }
    }
  }

  /// Rolling health state a background checker maintains between probes.
  #[ derive( Debug, Clone ) ]
  pub struct HealthState
  {
    /// Most recent classification.
    pub status : HealthStatus,
    /// Exponential moving average of probe latency (smoothing factor `0.2`).
    pub average_latency : Duration,
    /// Total probes that came back non-2xx, timed out, or failed to connect.
    pub error_count : u64,
    /// Total probes issued.
    pub probe_count : u64,
  }

  impl Default for HealthState
  {
    #[ inline ]
    fn default() -> Self
    {
      Self { status : HealthStatus::Healthy, average_latency : Duration::ZERO, error_count : 0, probe_count : 0 }
    }
  }

  impl HealthState
  {
    fn record( &mut self, result : &HealthCheckResult )
    {
      self.status = result.status;
      self.probe_count += 1;
      if result.error_message.is_some()
      {
        self.error_count += 1;
      }
      self.average_latency = if self.probe_count == 1
      {
        result.latency
      }
      else
      {
        let previous = self.average_latency.as_secs_f64();
        let sample = result.latency.as_secs_f64();
        Duration::from_secs_f64( previous.mul_add( 0.8, sample * 0.2 ) )
      };
    }
  }

  /// Owns a provider's pooled HTTP client together with a background task
  /// that probes `<base_url><endpoint_suffix>` on `health_check.interval`,
  /// rolling a latency average and an error counter into [`HealthState`].
  ///
  /// Health results are observational only : they do not gate requests in
  /// this release (see [`HealthChecker::check`]). Dropping or [`Self::close`]ing
  /// the pool stops the background task; the underlying `reqwest::Client`
  /// keeps pooling idle connections per `reqwest`'s own internal lifecycle
  /// until it is itself dropped.
  #[ derive( Debug ) ]
  pub struct ConnectionPool
  {
    client : reqwest::Client,
    state : Arc< RwLock< HealthState > >,
    cancel : tokio_util::sync::CancellationToken,
    task : std::sync::Mutex< Option< tokio::task::JoinHandle< () > > >,
  }

  impl ConnectionPool
  {
    /// Build the pooled client and spawn its health-check loop.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::InvalidConfig`] if the underlying TLS backend
    /// fails to initialize.
    pub fn new( pool_config : &ConnectionPoolConfig, health_config : HealthCheckConfig, base_url : String, default_timeout : Duration ) -> Result< Self, RuntimeError >
    {
      let client = build_http_client( pool_config, default_timeout )?;
      let state = Arc::new( RwLock::new( HealthState::default() ) );
      let cancel = tokio_util::sync::CancellationToken::new();

      let task_client = client.clone();
      let task_state = state.clone();
      let task_cancel = cancel.clone();
      let thresholds = HealthThresholds::default();
      let handle = tokio::spawn( async move
      {
        loop
        {
          tokio::select!
          {
            () = task_cancel.cancelled() => break,
            () = tokio::time::sleep( health_config.interval ) =>
            {
              let result = HealthChecker::check( &task_client, &base_url, &health_config, thresholds ).await;
              task_state.write().unwrap_or_else( std::sync::PoisonError::into_inner ).record( &result );
            }
          }
        }
      } );

      Ok( Self { client, state, cancel, task : std::sync::Mutex::new( Some( handle ) ) } )
    }

    /// The pooled HTTP client.
    #[ must_use ]
    #[ inline ]
    pub fn client( &self ) -> &reqwest::Client
    {
      &self.client
    }

    /// A defensive copy of the current rolling health state.
    #[ must_use ]
    #[ inline ]
    pub fn health( &self ) -> HealthState
    {
      self.state.read().unwrap_or_else( std::sync::PoisonError::into_inner ).clone()
    }

    /// Stop the background health-check task. Idempotent; releasing the
    /// client's own idle connections happens when the last clone of it
    /// drops.
    pub async fn close( &self )
    {
      self.cancel.cancel();
      let handle = self.task.lock().unwrap_or_else( std::sync::PoisonError::into_inner ).take();
      if let Some( handle ) = handle
      {
        let _ = handle.await;
      }
    }
  }

  #[ cfg( test ) ]
  mod tests
  {
    use super::*;

    #[ test ]
    fn build_http_client_rejects_nothing_on_default_config()
    {
      let config = ConnectionPoolConfig::default();
      assert!( build_http_client( &config, Duration::from_secs( 30 ) ).is_ok() );
    }

    #[ test ]
    fn thresholds_default_orders_degraded_before_unhealthy()
    {
      let thresholds = HealthThresholds::default();
      assert!( thresholds.degraded < thresholds.unhealthy );
    }

    #[ test ]
    fn health_state_defaults_to_healthy_with_no_probes()
    {
      let state = HealthState::default();
      assert_eq!( state.status, HealthStatus::Healthy );
      assert_eq!( state.probe_count, 0 );
    }

    #[ test ]
    fn health_state_counts_errors_and_tracks_latest_status()
    {
      let mut state = HealthState::default();
      state.record( &HealthCheckResult { endpoint : "x".into(), status : HealthStatus::Healthy, latency : Duration::from_millis( 10 ), error_message : None } );
      state.record( &HealthCheckResult { endpoint : "x".into(), status : HealthStatus::Unhealthy, latency : Duration::from_millis( 20 ), error_message : Some( "boom".into() ) } );
      assert_eq!( state.probe_count, 2 );
      assert_eq!( state.error_count, 1 );
      assert_eq!( state.status, HealthStatus::Unhealthy );
    }

    #[ tokio::test( start_paused = true ) ]
    async fn pool_probes_on_interval_and_close_stops_the_task()
    {
      let pool_config = ConnectionPoolConfig::default();
      let health_config = HealthCheckConfig { interval : Duration::from_millis( 10 ), timeout : Duration::from_secs( 1 ), endpoint_suffix : "/health".to_string() };
      let pool = ConnectionPool::new( &pool_config, health_config, "http://127.0.0.1:1".to_string(), Duration::from_secs( 5 ) ).unwrap();

      tokio::time::advance( Duration::from_millis( 35 ) ).await;
      tokio::task::yield_now().await;

      assert!( pool.health().probe_count >= 1 );
      pool.close().await;
    }
  }

} // end mod private

crate::mod_interface!
{
  exposed use
  {
    build_http_client,
    HealthStatus,
    HealthCheckResult,
    HealthThresholds,
    HealthChecker,
    HealthState,
    ConnectionPool,
  };
}
