//! Error taxonomy shared by every layer of the resilience pipeline.
//!
//! Errors are semantic, not per-provider : a `ProviderError` carries the
//! wire-level detail (status code, body) through every wrapping layer so a
//! caller at the top of the pipeline can still inspect what the upstream
//! actually said.

#[ allow( clippy::missing_inline_in_public_items ) ]
mod private
{
  use core::fmt;
  use error_tools::dependency::thiserror;

  /// A structured failure returned by an upstream provider's HTTP API.
  #[ derive( Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize ) ]
  #[ non_exhaustive ]
  pub struct ProviderErrorDetail
  {
    /// HTTP status code returned by the upstream.
    pub status_code : u16,
    /// Upstream-defined error type, if present (e.g. `"invalid_request_error"`).
    pub error_type : Option< String >,
    /// Upstream-defined error code, if present.
    pub code : Option< String >,
    /// Human-readable error message.
    pub message : String,
    /// Raw response body, retained for diagnostics.
    pub raw_body : String,
  }

  impl fmt::Display for ProviderErrorDetail
  {
    #[ inline ]
    fn fmt( &self, formatter : &mut fmt::Formatter< '_ > ) -> fmt::Result
    {
      write!( formatter, "provider error (status {}): {}", self.status_code, self.message )
    }
  }

  impl ProviderErrorDetail
  {
    /// A `ProviderError` is retryable iff its status is in the configured
    /// retryable set or falls in `[500, 600)`.
    #[ must_use ]
    #[ inline ]
    pub fn is_retryable( &self, retryable_status_codes : &[ u16 ] ) -> bool
    {
      retryable_status_codes.contains( &self.status_code ) || ( 500..600 ).contains( &self.status_code )
    }
  }

  /// Errors surfaced anywhere along the request execution pipeline.
  #[ derive( Debug, Clone, thiserror::Error ) ]
  #[ non_exhaustive ]
  pub enum RuntimeError
  {
    /// Missing required credential, type mismatch, or unparseable base URL.
    #[ error( "invalid configuration : {0}" ) ]
    InvalidConfig( String ),

    /// Structured upstream failure.
    #[ error( "{0}" ) ]
    Provider( ProviderErrorDetail ),

    /// Connection reset, DNS failure, TLS handshake failure. Always retryable.
    #[ error( "transport error : {0}" ) ]
    Transport( String ),

    /// Request timeout or context deadline. Not retried by the retry engine.
    #[ error( "timeout : {0}" ) ]
    Timeout( String ),

    /// The local rate limiter refused to proceed (typically cancellation during wait).
    #[ error( "rate limited : {0}" ) ]
    RateLimited( String ),

    /// The circuit breaker refused admission.
    #[ error( "circuit open" ) ]
    CircuitOpen,

    /// The priority queue is at capacity.
    #[ error( "queue full" ) ]
    QueueFull,

    /// The priority queue expired the request before a worker picked it up.
    #[ error( "queue timeout" ) ]
    QueueTimeout,

    /// The caller's cancellation context was cancelled.
    #[ error( "cancelled" ) ]
    Cancelled,

    /// The requested capability is not implemented for this provider.
    #[ error( "not implemented for {provider} : {capability}" ) ]
    NotImplemented
    {
      /// Provider type tag.
      provider : String,
      /// Capability or operation name.
      capability : String,
    },

    /// The retry engine exhausted its budget; wraps the last observed error.
    #[ error( "retry budget exhausted after {attempts} attempts : {source}" ) ]
    RetryExhausted
    {
      /// Total attempts made, including the first.
      attempts : u32,
      /// The final error returned by the wrapped operation.
      #[ source ]
      source : Box< RuntimeError >,
    },

    /// A provider, model, or capability lookup failed.
    #[ error( "not found : {0}" ) ]
    NotFound( String ),

    /// JSON encode/decode failure.
    #[ error( "serialization error : {0}" ) ]
    Serialization( String ),

    /// Persistent job-queue backend (Redis) failure.
    #[ error( "job queue error : {0}" ) ]
    JobQueue( String ),
  }

  impl RuntimeError
  {
    /// Classify whether this error should be retried by the retry engine.
    ///
    /// Structured provider errors are retryable per their status code;
    /// transport-layer errors are always retryable; everything else is not.
    #[ must_use ]
    #[ inline ]
    pub fn is_retryable( &self, retryable_status_codes : &[ u16 ] ) -> bool
    {
      match self
      {
        Self::Provider( detail ) => detail.is_retryable( retryable_status_codes ),
        Self::Transport( _ ) => true,
        _ => false,
      }
    }
  }

  impl From< reqwest::Error > for RuntimeError
  {
    #[ inline ]
    fn from( error : reqwest::Error ) -> Self
    {
      if error.is_timeout()
      {
        Self::Timeout( error.to_string() )
      }
      else if error.is_connect() || error.is_request()
      {
        Self::Transport( error.to_string() )
      }
      else
      {
        Self::Transport( error.to_string() )
      }
    }
  }

  impl From< serde_json::Error > for RuntimeError
  {
    #[ inline ]
    fn from( error : serde_json::Error ) -> Self
    {
      Self::Serialization( error.to_string() )
    }
  }

  #[ cfg( feature = "job-queue" ) ]
  impl From< redis::RedisError > for RuntimeError
  {
    #[ inline ]
    fn from( error : redis::RedisError ) -> Self
    {
      Self::JobQueue( error.to_string() )
    }
  }

  /// Type alias for results using the `error_tools` untyped pattern, used at
  /// composition-root boundaries that do not need to match on error kind.
  pub type Result< T > = error_tools::untyped::Result< T >;

  /// Result alias for operations that return the structured [`RuntimeError`].
  pub type RuntimeResult< T > = core::result::Result< T, RuntimeError >;

#[ cfg( test ) ]
mod tests
{
  use super::{ ProviderErrorDetail, RuntimeError };

  #[ test ]
  fn provider_error_retryable_by_status_list()
  {
    let detail = ProviderErrorDetail
    {
      status_code : 429,
      error_type : None,
      code : None,
      message : "rate limited".into(),
      raw_body : String::new(),
    };
    assert!( detail.is_retryable( &[ 429, 500 ] ) );
    assert!( !detail.is_retryable( &[ 400 ] ) );
  }

  #[ test ]
  fn provider_error_retryable_by_5xx_range()
  {
    let detail = ProviderErrorDetail
    {
      status_code : 503,
      error_type : None,
      code : None,
      message : "unavailable".into(),
      raw_body : String::new(),
    };
    assert!( detail.is_retryable( &[] ) );
  }

  #[ test ]
  fn non_provider_errors_are_not_retryable()
  {
    let error = RuntimeError::CircuitOpen;
    assert!( !error.is_retryable( &[ 500 ] ) );
  }

  #[ test ]
  fn transport_errors_are_always_retryable()
  {
    let error = RuntimeError::Transport( "connection reset".into() );
    assert!( error.is_retryable( &[] ) );
  }
}

} // end mod private

crate::mod_interface!
{
  exposed use
  {
    ProviderErrorDetail,
    RuntimeError,
    Result,
    RuntimeResult,
  };
}
