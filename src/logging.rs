//! Request/response logging with regex-based PII redaction and per-level
//! handler registration.
//!
//! Grounded on the teacher's scattered `tracing::debug!`/`tracing::warn!`
//! call sites (request lifecycle logged at `info`, failures at `warn`) and
//! `input_validation.rs`'s field-level validation, generalized into one
//! `RequestLogger` that redacts five categories of sensitive text before
//! anything reaches a `tracing` event or a registered handler.

#[ allow( clippy::missing_inline_in_public_items ) ]
mod private
{
  use crate::error::RuntimeError;
  use crate::types::ProviderType;
  use std::sync::RwLock;
  use std::time::Duration;

  /// Severity at which a log record is emitted, mirroring `tracing`'s levels.
  #[ derive( Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize, serde::Deserialize ) ]
  pub enum LogLevel
  {
    /// Verbose diagnostic detail.
    Debug,
    /// Normal request lifecycle events.
    Info,
    /// Recoverable failures (retried, rate-limited, circuit-tripped).
    Warn,
    /// Terminal failures surfaced to the caller.
    Error,
  }

  /// A single logged event, post-redaction.
  #[ derive( Debug, Clone ) ]
  pub struct LogRecord
  {
    /// Severity.
    pub level : LogLevel,
    /// Correlation id shared by a request's start and completion records.
    pub request_id : String,
    /// Owning provider, if known.
    pub provider : Option< ProviderType >,
    /// Operation name, e.g. `"chat_completion"`.
    pub operation : String,
    /// Redacted human-readable message.
    pub message : String,
  }

  /// A registered sink invoked for every [`LogRecord`] at or above its level.
  pub type LogHandler = Box< dyn Fn( &LogRecord ) + Send + Sync >;

  fn redaction_patterns() -> &'static [ ( &'static str, &'static str ) ]
  {
    &[
      ( r"[\w.+-]+@[\w-]+\.[\w.-]+", "[redacted-email]" ),
      ( r"\b\d{3}[-.\s]?\d{2}[-.\s]?\d{4}\b", "[redacted-ssn]" ),
      ( r"\b(?:\d[ -]*?){13,19}\b", "[redacted-card]" ),
      ( r"\b(?:sk|pk|rk)-[A-Za-z0-9]{16,}\b", "[redacted-api-key]" ),
      ( r"\+?\d{1,3}[-.\s]?\(?\d{2,4}\)?[-.\s]?\d{3,4}[-.\s]?\d{3,4}\b", "[redacted-phone]" ),
    ]
  }

  /// Compiled redaction patterns, built once at logger construction so
  /// per-message redaction does not pay regex-compile cost.
  struct Redactor
  {
    compiled : Vec< ( regex::Regex, &'static str ) >,
  }

  impl Redactor
  {
    fn new() -> Self
    {
      let compiled = redaction_patterns().iter()
        .filter_map( | ( pattern, replacement ) | regex::Regex::new( pattern ).ok().map( | re | ( re, *replacement ) ) )
        .collect();
      Self { compiled }
    }

    fn redact( &self, input : &str ) -> String
    {
      let mut text = input.to_string();
      for ( pattern, replacement ) in &self.compiled
      {
        text = pattern.replace_all( &text, *replacement ).into_owned();
      }
      text
    }
  }

  /// Request/response logger : redacts sensitive substrings, emits a
  /// `tracing` event at the record's level, and fans out to any handlers
  /// registered for that level.
  pub struct RequestLogger
  {
    redactor : Redactor,
    handlers : RwLock< Vec< ( LogLevel, LogHandler ) > >,
    min_level : LogLevel,
  }

  impl std::fmt::Debug for RequestLogger
  {
    #[ inline ]
    fn fmt( &self, formatter : &mut std::fmt::Formatter< '_ > ) -> std::fmt::Result
    {
      formatter.debug_struct( "RequestLogger" ).field( "min_level", &self.min_level ).finish()
    }
  }

  impl RequestLogger
  {
    /// Construct a logger with the given minimum emission level.
    #[ must_use ]
    #[ inline ]
    pub fn new( min_level : LogLevel ) -> Self
    {
      Self { redactor : Redactor::new(), handlers : RwLock::new( Vec::new() ), min_level }
    }

    /// Register a handler invoked for every record at or above `level`.
    #[ inline ]
    pub fn on( &self, level : LogLevel, handler : LogHandler )
    {
      self.handlers.write().unwrap_or_else( std::sync::PoisonError::into_inner ).push( ( level, handler ) );
    }

    /// Log the start of a request, returning its generated correlation id.
    #[ must_use ]
    #[ inline ]
    pub fn log_request( &self, provider : &ProviderType, operation : &str, detail : &str ) -> String
    {
      let request_id = uuid::Uuid::new_v4().to_string();
      let message = self.redactor.redact( detail );
      tracing::info!( request_id = %request_id, provider = %provider, operation, "request started : {message}" );
      self.dispatch( LogRecord { level : LogLevel::Info, request_id : request_id.clone(), provider : Some( provider.clone() ), operation : operation.to_string(), message } );
      request_id
    }

    /// Log the completion of a request identified by `request_id`.
    #[ inline ]
    pub fn log_response( &self, request_id : &str, success : bool, elapsed : Duration, error : Option< &RuntimeError > )
    {
      let level = if success { LogLevel::Info } else { LogLevel::Warn };
      let message = match error
      {
        Some( error ) => self.redactor.redact( &error.to_string() ),
        None => format!( "completed in {}ms", elapsed.as_millis() ),
      };
      if success
      {
        tracing::info!( request_id, elapsed_ms = elapsed.as_millis() as u64, "request completed" );
      }
      else
      {
        tracing::warn!( request_id, elapsed_ms = elapsed.as_millis() as u64, error = %message, "request failed" );
      }
      self.dispatch( LogRecord { level, request_id : request_id.to_string(), provider : None, operation : String::new(), message } );
    }

    fn dispatch( &self, record : LogRecord )
    {
      if record.level < self.min_level
      {
        return;
      }
      let handlers = self.handlers.read().unwrap_or_else( std::sync::PoisonError::into_inner );
      for ( level, handler ) in handlers.iter()
      {
        if record.level >= *level
        {
          handler( &record );
        }
      }
    }
  }

  impl Default for RequestLogger
  {
    #[ inline ]
    fn default() -> Self
    {
      Self::new( LogLevel::Info )
    }
  }

  #[ cfg( test ) ]
  mod tests
  {
    use super::{ RequestLogger, LogLevel, Redactor };
    use crate::types::ProviderType;
    use std::sync::{ Arc, Mutex };

    #[ test ]
    fn redacts_email_and_api_key()
    {
      let redactor = Redactor::new();
      let text = redactor.redact( "contact jane.doe@example.com using key sk-abcdefghijklmnopqrstuvwxyz" );
      assert!( !text.contains( "jane.doe@example.com" ) );
      assert!( !text.contains( "sk-abcdefghijklmnopqrstuvwxyz" ) );
      assert!( text.contains( "[redacted-email]" ) );
      assert!( text.contains( "[redacted-api-key]" ) );
    }

    #[ test ]
    fn handler_registered_below_min_level_still_receives_qualifying_records()
    {
      let logger = RequestLogger::new( LogLevel::Debug );
      let seen = Arc::new( Mutex::new( Vec::new() ) );
      let seen_clone = seen.clone();
      logger.on( LogLevel::Info, Box::new( move | record | seen_clone.lock().unwrap().push( record.message.clone() ) ) );
      logger.log_request( &ProviderType::new( "openai" ), "chat_completion", "hello" );
      assert_eq!( seen.lock().unwrap().len(), 1 );
    }

    #[ test ]
    fn records_below_min_level_are_not_dispatched()
    {
      let logger = RequestLogger::new( LogLevel::Error );
      let seen = Arc::new( Mutex::new( Vec::new() ) );
      let seen_clone = seen.clone();
      logger.on( LogLevel::Debug, Box::new( move | record | seen_clone.lock().unwrap().push( record.message.clone() ) ) );
      logger.log_request( &ProviderType::new( "openai" ), "chat_completion", "hello" );
      assert!( seen.lock().unwrap().is_empty() );
    }
  }

} // end mod private

crate::mod_interface!
{
  exposed use
  {
    LogLevel,
    LogRecord,
    LogHandler,
    RequestLogger,
  };
}
