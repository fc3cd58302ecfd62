//! Exponential backoff with jitter over a retryable-classified operation.
//! Grounded on the teacher's `enhanced_retry`, generalized from matching
//! `OpenAIError` variants to [`crate::error::RuntimeError::is_retryable`].

#[ allow( clippy::missing_inline_in_public_items ) ]
mod private
{
  use rand::Rng;
  use std::time::Duration;

  /// Retry tuning parameters.
  #[ derive( Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize ) ]
  pub struct RetryConfig
  {
    /// Maximum retry attempts after the first (total invocations = `max_retries + 1`).
    pub max_retries : u32,
    /// Backoff before the first retry.
    pub initial_backoff : Duration,
    /// Backoff ceiling.
    pub max_backoff : Duration,
    /// Multiplier applied to the backoff after each attempt.
    pub backoff_multiplier : f64,
    /// HTTP status codes considered retryable, in addition to the `5xx` range.
    pub retryable_status_codes : Vec< u16 >,
  }

  impl Default for RetryConfig
  {
    #[ inline ]
    fn default() -> Self
    {
      Self
      {
        max_retries : 3,
        initial_backoff : Duration::from_secs( 1 ),
        max_backoff : Duration::from_secs( 60 ),
        backoff_multiplier : 2.0,
        retryable_status_codes : vec![ 429, 500, 502, 503, 504 ],
      }
    }
  }

  impl RetryConfig
  {
    fn backoff_for_attempt( &self, attempt : u32 ) -> Duration
    {
      let scaled = self.initial_backoff.as_secs_f64() * self.backoff_multiplier.powi( attempt as i32 );
      let jittered = scaled * rand::rng().random_range( 0.5..=1.0 );
      Duration::from_secs_f64( jittered.min( self.max_backoff.as_secs_f64() ) )
    }
  }

  /// Drives an operation through up to `max_retries + 1` attempts.
  #[ derive( Debug ) ]
  pub struct RetryEngine
  {
    config : RetryConfig,
  }

  impl RetryEngine
  {
    /// Construct an engine with the given configuration.
    #[ must_use ]
    #[ inline ]
    pub fn new( config : RetryConfig ) -> Self
    {
      Self { config }
    }

    /// Invoke `fn_` up to `max_retries + 1` times total. After each failure,
    /// surfaces the error immediately if it is not retryable or the budget
    /// is exhausted (wrapping with [`crate::error::RuntimeError::RetryExhausted`]
    /// when the budget — not classification — is the reason for stopping).
    /// Otherwise sleeps for a jittered exponential backoff, or surfaces
    /// [`crate::error::RuntimeError::Cancelled`] if the context cancels first.
    pub async fn execute< T, F, Fut >( &self, ctx : &crate::pipeline::CancellationContext, mut fn_ : F ) -> Result< T, crate::error::RuntimeError >
    where
      F : FnMut() -> Fut,
      Fut : std::future::Future< Output = Result< T, crate::error::RuntimeError > >,
    {
      let mut attempt : u32 = 0;
      loop
      {
        match fn_().await
        {
          Ok( value ) => return Ok( value ),
          Err( error ) =>
          {
            let retryable = error.is_retryable( &self.config.retryable_status_codes );
            let attempts_made = attempt + 1;
            if !retryable
            {
              return Err( error );
            }
            if attempts_made > self.config.max_retries
            {
              return Err( crate::error::RuntimeError::RetryExhausted { attempts : attempts_made, source : Box::new( error ) } );
            }
            let delay = self.config.backoff_for_attempt( attempt );
            tokio::select!
            {
              biased;
              () = ctx.cancelled() => return Err( crate::error::RuntimeError::Cancelled ),
              () = tokio::time::sleep( delay ) => {}
            }
            attempt += 1;
          }
        }
      }
    }
  }

  #[ cfg( test ) ]
  mod tests
  {
  use super::{ RetryEngine, RetryConfig };
  use crate::pipeline::CancellationContext;
  use crate::error::{ RuntimeError, ProviderErrorDetail };
  use std::sync::atomic::{ AtomicU32, Ordering };
  use std::time::Duration;

  fn retryable_error() -> RuntimeError
  {
    RuntimeError::Provider( ProviderErrorDetail { status_code : 503, error_type : None, code : None, message : "x".into(), raw_body : String::new() } )
  }

  #[ tokio::test( start_paused = true ) ]
  async fn retry_budget_bounds_total_invocations()
  {
    let engine = RetryEngine::new( RetryConfig { max_retries : 4, initial_backoff : Duration::from_millis( 1 ), max_backoff : Duration::from_millis( 4 ), ..RetryConfig::default() } );
    let calls = AtomicU32::new( 0 );
    let ctx = CancellationContext::new();
    let result : Result< (), _ > = engine.execute( &ctx, || { calls.fetch_add( 1, Ordering::SeqCst ); async { Err( retryable_error() ) } } ).await;
    assert!( matches!( result, Err( RuntimeError::RetryExhausted { attempts : 5, .. } ) ) );
    assert_eq!( calls.load( Ordering::SeqCst ), 5 );
  }

  #[ tokio::test ]
  async fn non_retryable_error_performs_exactly_one_invocation()
  {
    let engine = RetryEngine::new( RetryConfig::default() );
    let calls = AtomicU32::new( 0 );
    let ctx = CancellationContext::new();
    let result : Result< (), _ > = engine.execute( &ctx, || { calls.fetch_add( 1, Ordering::SeqCst ); async { Err( RuntimeError::InvalidConfig( "bad".into() ) ) } } ).await;
    assert!( matches!( result, Err( RuntimeError::InvalidConfig( _ ) ) ) );
    assert_eq!( calls.load( Ordering::SeqCst ), 1 );
  }

  #[ tokio::test( start_paused = true ) ]
  async fn backoff_saturates_at_max_backoff()
  {
    let config = RetryConfig { max_retries : 4, initial_backoff : Duration::from_millis( 10 ), max_backoff : Duration::from_millis( 40 ), backoff_multiplier : 2.0, ..RetryConfig::default() };
    assert!( config.backoff_for_attempt( 0 ) <= Duration::from_millis( 10 ) );
    assert!( config.backoff_for_attempt( 10 ) <= Duration::from_millis( 40 ) );
  }
  }

} // end mod private

crate::mod_interface!
{
  exposed use
  {
    RetryConfig,
    RetryEngine,
  };
}
