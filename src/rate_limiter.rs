//! Token-bucket rate limiting over requests and tokens, plus a bounded
//! concurrency semaphore. Grounded on the teacher's `enhanced_rate_limiting`
//! token-bucket pair, generalized with a `tokio::sync::Semaphore` for the
//! concurrency slot the teacher's module does not have.

#[ allow( clippy::missing_inline_in_public_items ) ]
mod private
{
  use std::sync::Mutex;
  use std::time::{ Duration, Instant };
  use tokio::sync::Semaphore;

  /// Configuration for a provider's rate limiter.
  ///
  /// A parameter `<= 0` falls back to its documented default : rpm = 60,
  /// tpm = 100_000, concurrency = 10, burst = `max(1, rpm / 10)`.
  #[ derive( Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize ) ]
  pub struct RateLimitConfig
  {
    /// Requests per minute.
    pub requests_per_minute : i64,
    /// Tokens per minute.
    pub tokens_per_minute : i64,
    /// Maximum concurrent in-flight requests.
    pub max_concurrent_requests : i64,
    /// Request-bucket burst capacity. `<= 0` derives `max(1, rpm / 10)`.
    pub burst : i64,
  }

  impl Default for RateLimitConfig
  {
    #[ inline ]
    fn default() -> Self
    {
      Self { requests_per_minute : 0, tokens_per_minute : 0, max_concurrent_requests : 0, burst : 0 }
    }
  }

  impl RateLimitConfig
  {
    fn resolved_requests_per_minute( self ) -> i64 { if self.requests_per_minute > 0 { self.requests_per_minute } else { 60 } }
    fn resolved_tokens_per_minute( self ) -> i64 { if self.tokens_per_minute > 0 { self.tokens_per_minute } else { 100_000 } }
    fn resolved_concurrency( self ) -> i64 { if self.max_concurrent_requests > 0 { self.max_concurrent_requests } else { 10 } }
    fn resolved_burst( self ) -> i64
    {
      if self.burst > 0 { self.burst } else { core::cmp::max( 1, self.resolved_requests_per_minute() / 10 ) }
    }
  }

  #[ derive( Debug, Clone, Copy ) ]
  struct TokenBucket
  {
    capacity : f64,
    tokens : f64,
    refill_per_sec : f64,
    last_refill : Instant,
  }

  impl TokenBucket
  {
    fn new( capacity : f64, refill_per_sec : f64 ) -> Self
    {
      Self { capacity, tokens : capacity, refill_per_sec, last_refill : Instant::now() }
    }

    fn refill( &mut self )
    {
      let now = Instant::now();
      let elapsed = now.duration_since( self.last_refill ).as_secs_f64();
      self.tokens = ( self.tokens + elapsed * self.refill_per_sec ).min( self.capacity );
      self.last_refill = now;
    }

    /// Attempt to take `n` tokens, returning whether it succeeded.
    fn try_take( &mut self, n : f64 ) -> bool
    {
      self.refill();
      if self.tokens >= n
      {
        self.tokens -= n;
        true
      }
      else
      {
        false
      }
    }
  }

  /// The two token buckets (requests, tokens) and the concurrency semaphore
  /// that together gate every outbound request.
  #[ derive( Debug ) ]
  pub struct RateLimiterBuckets
  {
    request_bucket : Mutex< TokenBucket >,
    token_bucket : Mutex< TokenBucket >,
    concurrency : std::sync::Arc< Semaphore >,
    enabled : std::sync::atomic::AtomicBool,
    limits : RateLimitConfig,
  }

  impl RateLimiterBuckets
  {
    fn build( config : RateLimitConfig ) -> Self
    {
      let rpm = config.resolved_requests_per_minute() as f64;
      let tpm = config.resolved_tokens_per_minute() as f64;
      let burst = config.resolved_burst() as f64;
      let concurrency = config.resolved_concurrency() as usize;
      Self
      {
        request_bucket : Mutex::new( TokenBucket::new( burst, rpm / 60.0 ) ),
        token_bucket : Mutex::new( TokenBucket::new( tpm / 10.0, tpm / 60.0 ) ),
        concurrency : std::sync::Arc::new( Semaphore::new( concurrency ) ),
        enabled : std::sync::atomic::AtomicBool::new( true ),
        limits : config,
      }
    }
  }

  /// Permit returned by [`RateLimiter::wait`]; dropping or calling
  /// [`RateLimiter::release`] returns the held concurrency slot.
  #[ derive( Debug ) ]
  pub struct ConcurrencyPermit( Option< tokio::sync::OwnedSemaphorePermit > );

  /// Gate coordinating one provider's outbound request rate.
  #[ derive( Debug ) ]
  pub struct RateLimiter
  {
    buckets : std::sync::RwLock< RateLimiterBuckets >,
  }

  impl RateLimiter
  {
    /// Construct a limiter from the given configuration, applying defaults
    /// to any parameter `<= 0`.
    #[ must_use ]
    #[ inline ]
    pub fn new( config : RateLimitConfig ) -> Self
    {
      Self { buckets : std::sync::RwLock::new( RateLimiterBuckets::build( config ) ) }
    }

    /// If disabled, returns immediately. Otherwise awaits one request-bucket
    /// token, then acquires one concurrency slot.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::RuntimeError::Cancelled`] if `ctx` cancels
    /// while waiting. A request token already consumed before cancellation
    /// during the concurrency-slot wait is not returned to the bucket —
    /// this loss is accepted per the spec's edge-policy note.
    pub async fn wait( &self, ctx : &crate::pipeline::CancellationContext ) -> Result< ConcurrencyPermit, crate::error::RuntimeError >
    {
      if !self.is_enabled()
      {
        return Ok( ConcurrencyPermit( None ) );
      }
      self.wait_for_request_token( ctx ).await?;
      let semaphore = { self.buckets.read().unwrap_or_else( std::sync::PoisonError::into_inner ).concurrency.clone() };
      let permit = tokio::select!
      {
        biased;
        () = ctx.cancelled() => return Err( crate::error::RuntimeError::Cancelled ),
        permit = semaphore.acquire_owned() => permit.map_err( | _ | crate::error::RuntimeError::Cancelled )?,
      };
      Ok( ConcurrencyPermit( Some( permit ) ) )
    }

    async fn wait_for_request_token( &self, ctx : &crate::pipeline::CancellationContext ) -> Result< (), crate::error::RuntimeError >
    {
      loop
      {
        let took = { self.buckets.read().unwrap_or_else( std::sync::PoisonError::into_inner ).request_bucket.lock().unwrap_or_else( std::sync::PoisonError::into_inner ).try_take( 1.0 ) };
        if took { return Ok( () ); }
        tokio::select!
        {
          biased;
          () = ctx.cancelled() => return Err( crate::error::RuntimeError::Cancelled ),
          () = tokio::time::sleep( Duration::from_millis( 10 ) ) => {}
        }
      }
    }

    /// Return a held concurrency slot. No-op if disabled, or if the permit
    /// carries no slot (extra releases are silently absorbed).
    #[ inline ]
    pub fn release( &self, permit : ConcurrencyPermit )
    {
      drop( permit );
    }

    /// Await `n` token-bucket tokens; no-op if disabled.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::RuntimeError::Cancelled`] if `ctx` cancels
    /// first.
    pub async fn wait_for_tokens( &self, ctx : &crate::pipeline::CancellationContext, n : u32 ) -> Result< (), crate::error::RuntimeError >
    {
      if !self.is_enabled() { return Ok( () ); }
      loop
      {
        let took = { self.buckets.read().unwrap_or_else( std::sync::PoisonError::into_inner ).token_bucket.lock().unwrap_or_else( std::sync::PoisonError::into_inner ).try_take( f64::from( n ) ) };
        if took { return Ok( () ); }
        tokio::select!
        {
          biased;
          () = ctx.cancelled() => return Err( crate::error::RuntimeError::Cancelled ),
          () = tokio::time::sleep( Duration::from_millis( 10 ) ) => {}
        }
      }
    }

    /// Atomically rebuild the buckets from new limits. When concurrency
    /// shrinks, already-issued slots remain valid until released; no new
    /// slots above the new cap are issued.
    #[ inline ]
    pub fn update_limits( &self, config : RateLimitConfig )
    {
      let mut guard = self.buckets.write().unwrap_or_else( std::sync::PoisonError::into_inner );
      let enabled = guard.enabled.load( std::sync::atomic::Ordering::SeqCst );
      *guard = RateLimiterBuckets::build( config );
      guard.enabled.store( enabled, std::sync::atomic::Ordering::SeqCst );
    }

    /// The configuration this limiter was last built or updated from.
    #[ must_use ]
    #[ inline ]
    pub fn get_limits( &self ) -> RateLimitConfig
    {
      self.buckets.read().unwrap_or_else( std::sync::PoisonError::into_inner ).limits
    }

    /// Whether gating is currently enabled.
    #[ must_use ]
    #[ inline ]
    pub fn is_enabled( &self ) -> bool
    {
      self.buckets.read().unwrap_or_else( std::sync::PoisonError::into_inner ).enabled.load( std::sync::atomic::Ordering::SeqCst )
    }

    /// Enable gating.
    #[ inline ]
    pub fn enable( &self )
    {
      self.buckets.read().unwrap_or_else( std::sync::PoisonError::into_inner ).enabled.store( true, std::sync::atomic::Ordering::SeqCst );
    }

    /// Disable gating; `wait`/`wait_for_tokens` return immediately.
    #[ inline ]
    pub fn disable( &self )
    {
      self.buckets.read().unwrap_or_else( std::sync::PoisonError::into_inner ).enabled.store( false, std::sync::atomic::Ordering::SeqCst );
    }
  }

  #[ cfg( test ) ]
  mod tests
  {
  use super::{ RateLimiter, RateLimitConfig };
  use crate::pipeline::CancellationContext;

  #[ tokio::test ]
  async fn disabled_limiter_never_blocks()
  {
    let limiter = RateLimiter::new( RateLimitConfig { requests_per_minute : 1, max_concurrent_requests : 1, ..Default::default() } );
    limiter.disable();
    let ctx = CancellationContext::new();
    for _ in 0..10
    {
      let permit = limiter.wait( &ctx ).await.unwrap();
      limiter.release( permit );
    }
  }

  #[ tokio::test ]
  async fn concurrency_slots_never_exceed_configured_maximum()
  {
    let limiter = std::sync::Arc::new( RateLimiter::new( RateLimitConfig { requests_per_minute : 6000, max_concurrent_requests : 2, burst : 6000, ..Default::default() } ) );
    let ctx = CancellationContext::new();
    let permit_a = limiter.wait( &ctx ).await.unwrap();
    let permit_b = limiter.wait( &ctx ).await.unwrap();
    let limiter_clone = limiter.clone();
    let ctx_clone = ctx.clone();
    let handle = tokio::spawn( async move { limiter_clone.wait( &ctx_clone ).await } );
    tokio::time::sleep( std::time::Duration::from_millis( 50 ) ).await;
    assert!( !handle.is_finished() );
    limiter.release( permit_a );
    let permit_c = handle.await.unwrap().unwrap();
    limiter.release( permit_b );
    limiter.release( permit_c );
  }

  #[ tokio::test ]
  async fn zero_rpm_falls_back_to_default_sixty()
  {
    let limiter = RateLimiter::new( RateLimitConfig::default() );
    let ctx = CancellationContext::new();
    let permit = limiter.wait( &ctx ).await.unwrap();
    limiter.release( permit );
  }

  #[ test ]
  fn get_limits_reflects_update_limits()
  {
    let limiter = RateLimiter::new( RateLimitConfig { requests_per_minute : 30, ..Default::default() } );
    assert_eq!( limiter.get_limits().requests_per_minute, 30 );
    limiter.update_limits( RateLimitConfig { requests_per_minute : 90, ..Default::default() } );
    assert_eq!( limiter.get_limits().requests_per_minute, 90 );
  }
  }

} // end mod private

crate::mod_interface!
{
  exposed use
  {
    RateLimitConfig,
    RateLimiterBuckets,
    ConcurrencyPermit,
    RateLimiter,
  };
}
