//! Per-model usage counters, windowed over the last hour for derived
//! requests-per-minute / tokens-per-minute figures.
//!
//! Grounded on the teacher's `metrics_framework.rs` counter shape
//! (request/error counts behind a lock, defensive-copy reads), generalized
//! from a single client's counters to per-(provider, model) entries and
//! extended with the windowed derivation spec §4.11 / §3 requires.

#[ allow( clippy::missing_inline_in_public_items ) ]
mod private
{
  use std::collections::{ HashMap, VecDeque };
  use std::sync::RwLock;
  use std::time::{ Duration, Instant, SystemTime };

  /// One recorded request, kept only long enough to feed the one-hour
  /// windowed rpm/tpm derivation.
  #[ derive( Debug, Clone, Copy ) ]
  struct WindowedSample
  {
    at : Instant,
    tokens : u32,
  }

  /// Per-model counters, snapshotted defensively on every read.
  #[ derive( Debug, Clone, Default ) ]
  pub struct UsageMetrics
  {
    /// Total requests recorded.
    pub request_count : u64,
    /// Total tokens recorded across all requests.
    pub token_count : u64,
    /// Total requests that recorded an error.
    pub error_count : u64,
    /// Timestamp of the most recent recorded request.
    pub last_request_at : Option< SystemTime >,
    /// Sum of all recorded request durations.
    pub total_duration : Duration,
    /// Requests observed in the trailing one-hour window, per minute.
    pub requests_per_minute : f64,
    /// Tokens observed in the trailing one-hour window, per minute.
    pub tokens_per_minute : f64,
  }

  impl UsageMetrics
  {
    /// Mean request duration, or zero if no requests have been recorded.
    #[ must_use ]
    #[ inline ]
    pub fn average_latency( &self ) -> Duration
    {
      if self.request_count == 0
      {
        Duration::ZERO
      }
      else
      {
        self.total_duration / u32::try_from( self.request_count ).unwrap_or( u32::MAX )
      }
    }
  }

  #[ derive( Debug, Default ) ]
  struct ModelUsage
  {
    metrics : UsageMetrics,
    window : VecDeque< WindowedSample >,
  }

  const WINDOW : Duration = Duration::from_secs( 3600 );

  impl ModelUsage
  {
    fn record( &mut self, tokens : u32, duration : Duration, failed : bool )
    {
      self.metrics.request_count += 1;
      self.metrics.token_count += u64::from( tokens );
      if failed
      {
        self.metrics.error_count += 1;
      }
      self.metrics.last_request_at = Some( SystemTime::now() );
      self.metrics.total_duration += duration;

      let now = Instant::now();
      self.window.push_back( WindowedSample { at : now, tokens } );
      self.evict_stale( now );
      self.recompute_rates( now );
    }

    fn evict_stale( &mut self, now : Instant )
    {
      while let Some( front ) = self.window.front()
      {
        if now.duration_since( front.at ) > WINDOW
        {
          self.window.pop_front();
        }
        else
        {
          break;
        }
      }
    }

    fn recompute_rates( &mut self, now : Instant )
    {
      let span_minutes = self.window.front()
        .map( | sample | now.duration_since( sample.at ).as_secs_f64() / 60.0 )
        .filter( | minutes | *minutes > 0.0 )
        .unwrap_or( 1.0 );
      let requests = self.window.len() as f64;
      let tokens : u64 = self.window.iter().map( | sample | u64::from( sample.tokens ) ).sum();
      self.metrics.requests_per_minute = requests / span_minutes;
      self.metrics.tokens_per_minute = tokens as f64 / span_minutes;
    }
  }

  /// RW-locked per-model usage counters with an optional periodic reset.
  #[ derive( Debug ) ]
  pub struct UsageTracker
  {
    per_model : RwLock< HashMap< String, ModelUsage > >,
    reset_interval : Option< Duration >,
    last_reset : RwLock< Instant >,
  }

  impl UsageTracker
  {
    /// Construct a tracker, optionally clearing all counters every
    /// `reset_interval` (checked lazily on each `add_request`).
    #[ must_use ]
    #[ inline ]
    pub fn new( reset_interval : Option< Duration > ) -> Self
    {
      Self { per_model : RwLock::new( HashMap::new() ), reset_interval, last_reset : RwLock::new( Instant::now() ) }
    }

    /// Record one completed request against `model_id`.
    #[ inline ]
    pub fn add_request( &self, model_id : &str, tokens : u32, duration : Duration, failed : bool )
    {
      self.maybe_reset();
      let mut guard = self.per_model.write().unwrap_or_else( std::sync::PoisonError::into_inner );
      guard.entry( model_id.to_string() ).or_default().record( tokens, duration, failed );
    }

    /// Defensive copy of one model's current counters.
    #[ must_use ]
    #[ inline ]
    pub fn metrics( &self, model_id : &str ) -> Option< UsageMetrics >
    {
      let guard = self.per_model.read().unwrap_or_else( std::sync::PoisonError::into_inner );
      guard.get( model_id ).map( | usage | usage.metrics.clone() )
    }

    /// Clear every model's counters immediately.
    #[ inline ]
    pub fn reset( &self )
    {
      self.per_model.write().unwrap_or_else( std::sync::PoisonError::into_inner ).clear();
      *self.last_reset.write().unwrap_or_else( std::sync::PoisonError::into_inner ) = Instant::now();
    }

    fn maybe_reset( &self )
    {
      let Some( interval ) = self.reset_interval else { return };
      let due = { self.last_reset.read().unwrap_or_else( std::sync::PoisonError::into_inner ).elapsed() > interval };
      if due
      {
        self.reset();
      }
    }
  }

  impl Default for UsageTracker
  {
    #[ inline ]
    fn default() -> Self
    {
      Self::new( None )
    }
  }

  #[ cfg( test ) ]
  mod tests
  {
    use super::UsageTracker;
    use std::time::Duration;

    #[ test ]
    fn sums_requests_and_tokens_across_calls()
    {
      let tracker = UsageTracker::default();
      tracker.add_request( "gpt-4", 10, Duration::from_millis( 5 ), false );
      tracker.add_request( "gpt-4", 7, Duration::from_millis( 5 ), false );
      tracker.add_request( "gpt-4", 3, Duration::from_millis( 5 ), true );
      let metrics = tracker.metrics( "gpt-4" ).unwrap();
      assert_eq!( metrics.request_count, 3 );
      assert_eq!( metrics.token_count, 20 );
      assert_eq!( metrics.error_count, 1 );
    }

    #[ test ]
    fn average_latency_divides_total_by_count()
    {
      let tracker = UsageTracker::default();
      tracker.add_request( "gpt-4", 1, Duration::from_millis( 100 ), false );
      tracker.add_request( "gpt-4", 1, Duration::from_millis( 300 ), false );
      let metrics = tracker.metrics( "gpt-4" ).unwrap();
      assert_eq!( metrics.average_latency(), Duration::from_millis( 200 ) );
    }

    #[ test ]
    fn unknown_model_has_no_metrics()
    {
      let tracker = UsageTracker::default();
      assert!( tracker.metrics( "unknown" ).is_none() );
    }

    #[ test ]
    fn periodic_reset_clears_counters()
    {
      let tracker = UsageTracker::new( Some( Duration::from_millis( 1 ) ) );
      tracker.add_request( "gpt-4", 1, Duration::from_millis( 1 ), false );
      std::thread::sleep( Duration::from_millis( 5 ) );
      tracker.add_request( "gpt-4", 1, Duration::from_millis( 1 ), false );
      let metrics = tracker.metrics( "gpt-4" ).unwrap();
      assert_eq!( metrics.request_count, 1 );
    }
  }

} // end mod private

crate::mod_interface!
{
  exposed use
  {
    UsageMetrics,
    UsageTracker,
  };
}
