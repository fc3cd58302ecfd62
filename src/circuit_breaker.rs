//! Closed / open / half-open state machine gating admission to a failing
//! upstream. Grounded on the teacher's `enhanced_circuit_breaker`, whose
//! `should_allow_request` already takes a single lock across the
//! read-and-transition step; carried over unchanged in design here, keyed
//! per (provider, operation) rather than singleton-per-client.

#[ allow( clippy::missing_inline_in_public_items ) ]
mod private
{
  use std::sync::Mutex;
  use std::time::{ Duration, Instant };

  /// Circuit breaker tuning parameters.
  #[ derive( Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize ) ]
  pub struct CircuitBreakerConfig
  {
    /// Consecutive failures in `closed` before tripping to `open`.
    pub failure_threshold : u32,
    /// How long to stay `open` before probing again.
    pub reset_timeout : Duration,
    /// Consecutive successes in `half-open` before closing.
    pub half_open_success_threshold : u32,
  }

  impl Default for CircuitBreakerConfig
  {
    #[ inline ]
    fn default() -> Self
    {
      Self { failure_threshold : 5, reset_timeout : Duration::from_secs( 60 ), half_open_success_threshold : 2 }
    }
  }

  /// The three admission states of a breaker.
  #[ derive( Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize ) ]
  pub enum CircuitState
  {
    /// Admitting all requests.
    Closed,
    /// Refusing admission until `reset_timeout` elapses.
    Open,
    /// Probing with a limited number of admitted requests.
    HalfOpen,
  }

  #[ derive( Debug ) ]
  struct Inner
  {
    state : CircuitState,
    consecutive_failures : u32,
    consecutive_successes : u32,
    last_state_change : Instant,
  }

  impl Inner
  {
    fn transition_to( &mut self, state : CircuitState )
    {
      self.state = state;
      self.last_state_change = Instant::now();
      match state
      {
        CircuitState::Closed => { self.consecutive_failures = 0; self.consecutive_successes = 0; }
        CircuitState::Open => { self.consecutive_successes = 0; }
        CircuitState::HalfOpen => { self.consecutive_failures = 0; }
      }
    }
  }

  /// Per-(provider, operation) failure gate.
  #[ derive( Debug ) ]
  pub struct CircuitBreaker
  {
    config : CircuitBreakerConfig,
    inner : Mutex< Inner >,
  }

  impl CircuitBreaker
  {
    /// Construct a breaker starting `closed`.
    #[ must_use ]
    #[ inline ]
    pub fn new( config : CircuitBreakerConfig ) -> Self
    {
      Self
      {
        config,
        inner : Mutex::new( Inner { state : CircuitState::Closed, consecutive_failures : 0, consecutive_successes : 0, last_state_change : Instant::now() } ),
      }
    }

    /// Current state, as of the last transition (does not itself transition
    /// an expired `open` breaker — that only happens inside `allow`).
    #[ must_use ]
    #[ inline ]
    pub fn state( &self ) -> CircuitState
    {
      self.inner.lock().unwrap_or_else( std::sync::PoisonError::into_inner ).state
    }

    /// Decide whether a request is admitted, atomically performing the
    /// `open` -> `half-open` transition when the reset timeout has elapsed.
    /// `closed` always admits; `half-open` always admits.
    #[ inline ]
    pub fn allow( &self ) -> bool
    {
      let mut guard = self.inner.lock().unwrap_or_else( std::sync::PoisonError::into_inner );
      match guard.state
      {
        CircuitState::Closed | CircuitState::HalfOpen => true,
        CircuitState::Open =>
        {
          if guard.last_state_change.elapsed() > self.config.reset_timeout
          {
            guard.transition_to( CircuitState::HalfOpen );
            true
          }
          else
          {
            false
          }
        }
      }
    }

    /// Record a successful outcome. In `half-open`, closes the breaker once
    /// `half_open_success_threshold` consecutive successes are observed.
    #[ inline ]
    pub fn record_success( &self )
    {
      let mut guard = self.inner.lock().unwrap_or_else( std::sync::PoisonError::into_inner );
      match guard.state
      {
        CircuitState::Closed => { guard.consecutive_failures = 0; }
        CircuitState::HalfOpen =>
        {
          guard.consecutive_successes += 1;
          if guard.consecutive_successes >= self.config.half_open_success_threshold
          {
            guard.transition_to( CircuitState::Closed );
          }
        }
        CircuitState::Open => {}
      }
    }

    /// Record a failed outcome. Any failure in `half-open` reopens
    /// immediately; in `closed`, trips to `open` once
    /// `failure_threshold` consecutive failures are observed.
    #[ inline ]
    pub fn record_failure( &self )
    {
      let mut guard = self.inner.lock().unwrap_or_else( std::sync::PoisonError::into_inner );
      match guard.state
      {
        CircuitState::HalfOpen => guard.transition_to( CircuitState::Open ),
        CircuitState::Closed =>
        {
          guard.consecutive_failures += 1;
          if guard.consecutive_failures >= self.config.failure_threshold
          {
            guard.transition_to( CircuitState::Open );
          }
        }
        CircuitState::Open => {}
      }
    }

    /// Gate `fn` through `allow`, recording its outcome on the breaker.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::RuntimeError::CircuitOpen`] without invoking
    /// `fn` when the breaker refuses admission. Otherwise returns whatever
    /// `fn` returns, after recording the outcome.
    pub async fn execute< T, F, Fut >( &self, fn_ : F ) -> Result< T, crate::error::RuntimeError >
    where
      F : FnOnce() -> Fut,
      Fut : std::future::Future< Output = Result< T, crate::error::RuntimeError > >,
    {
      if !self.allow()
      {
        return Err( crate::error::RuntimeError::CircuitOpen );
      }
      match fn_().await
      {
        Ok( value ) => { self.record_success(); Ok( value ) }
        Err( error ) => { self.record_failure(); Err( error ) }
      }
    }
  }

  #[ cfg( test ) ]
  mod tests
  {
  use super::{ CircuitBreaker, CircuitBreakerConfig, CircuitState };
  use std::time::Duration;

  fn config() -> CircuitBreakerConfig
  {
    CircuitBreakerConfig { failure_threshold : 3, reset_timeout : Duration::from_millis( 50 ), half_open_success_threshold : 2 }
  }

  #[ tokio::test ]
  async fn opens_after_threshold_failures_then_closes_after_successes()
  {
    let breaker = CircuitBreaker::new( config() );
    for _ in 0..3
    {
      let result = breaker.execute( || async { Err::< (), _ >( crate::error::RuntimeError::Timeout( "x".into() ) ) } ).await;
      assert!( result.is_err() );
    }
    assert_eq!( breaker.state(), CircuitState::Open );
    let fourth = breaker.execute( || async { Ok::< _, crate::error::RuntimeError >( () ) } ).await;
    assert!( matches!( fourth, Err( crate::error::RuntimeError::CircuitOpen ) ) );

    tokio::time::sleep( Duration::from_millis( 60 ) ).await;

    breaker.execute( || async { Ok::< _, crate::error::RuntimeError >( () ) } ).await.unwrap();
    assert_eq!( breaker.state(), CircuitState::HalfOpen );
    breaker.execute( || async { Ok::< _, crate::error::RuntimeError >( () ) } ).await.unwrap();
    assert_eq!( breaker.state(), CircuitState::Closed );
    breaker.execute( || async { Ok::< _, crate::error::RuntimeError >( () ) } ).await.unwrap();
    assert_eq!( breaker.state(), CircuitState::Closed );
  }

  #[ tokio::test ]
  async fn failure_in_half_open_reopens_immediately()
  {
    let breaker = CircuitBreaker::new( config() );
    for _ in 0..3
    {
      let _ = breaker.execute( || async { Err::< (), _ >( crate::error::RuntimeError::Timeout( "x".into() ) ) } ).await;
    }
    tokio::time::sleep( Duration::from_millis( 60 ) ).await;
    let _ = breaker.execute( || async { Err::< (), _ >( crate::error::RuntimeError::Timeout( "x".into() ) ) } ).await;
    assert_eq!( breaker.state(), CircuitState::Open );
  }

  #[ test ]
  fn state_transitions_advance_last_change_monotonically()
  {
    let breaker = CircuitBreaker::new( config() );
    breaker.record_failure();
    breaker.record_failure();
    breaker.record_failure();
    assert_eq!( breaker.state(), CircuitState::Open );
  }
  }

} // end mod private

crate::mod_interface!
{
  exposed use
  {
    CircuitBreakerConfig,
    CircuitState,
    CircuitBreaker,
  };
}
