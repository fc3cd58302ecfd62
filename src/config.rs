//! Per-provider configuration, connection-pool / health-check sub-configs,
//! and the `ConfigManager` that holds them with copy-on-write semantics.

#[ allow( clippy::missing_inline_in_public_items ) ]
mod private
{
  use crate::types::ProviderType;
  use std::collections::HashMap;
  use std::sync::RwLock;
  use std::time::Duration;

  /// Connection pool sizing and TLS options for a provider's HTTP client.
  #[ derive( Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize ) ]
  pub struct ConnectionPoolConfig
  {
    /// Maximum idle connections kept per host.
    pub max_idle_per_host : usize,
    /// Maximum total connections.
    pub max_connections : usize,
    /// Whether keep-alive is enabled.
    pub keep_alive : bool,
    /// Whether HTTP/2 is negotiated when available.
    pub http2 : bool,
    /// TLS certificate verification. Disabling this is a deliberate opt-in.
    pub tls_verify : bool,
    /// Idle connection timeout.
    pub idle_timeout : Duration,
    /// TLS handshake timeout.
    pub tls_handshake_timeout : Duration,
    /// `Expect: 100-continue` timeout.
    pub expect_continue_timeout : Duration,
    /// Response headers timeout.
    pub response_headers_timeout : Duration,
  }

  impl Default for ConnectionPoolConfig
  {
    #[ inline ]
    fn default() -> Self
    {
      Self
      {
        max_idle_per_host : 32,
        max_connections : 128,
        keep_alive : true,
        http2 : true,
        tls_verify : true,
        idle_timeout : Duration::from_secs( 90 ),
        tls_handshake_timeout : Duration::from_secs( 10 ),
        expect_continue_timeout : Duration::from_secs( 1 ),
        response_headers_timeout : Duration::from_secs( 30 ),
      }
    }
  }

  /// Connection pool health-probe configuration.
  #[ derive( Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize ) ]
  pub struct HealthCheckConfig
  {
    /// How often to probe.
    pub interval : Duration,
    /// Per-probe timeout.
    pub timeout : Duration,
    /// Path suffix appended to the provider's base URL.
    pub endpoint_suffix : String,
  }

  impl Default for HealthCheckConfig
  {
    #[ inline ]
    fn default() -> Self
    {
      Self { interval : Duration::from_secs( 30 ), timeout : Duration::from_secs( 5 ), endpoint_suffix : "/health".to_string() }
    }
  }

  /// Per-provider configuration.
  ///
  /// Every field supports a "zero means keep existing" merge rule via
  /// [`ProviderConfig::merge_update`] : an update whose field is the type's
  /// zero value (empty string, `None`, `Duration::ZERO`) leaves the existing
  /// field untouched.
  #[ derive( Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize ) ]
  pub struct ProviderConfig
  {
    /// Provider type tag; must match the owning provider.
    pub provider_type : ProviderType,
    /// Bearer / API-key credential. Required, validated non-empty at construction.
    pub api_key : String,
    /// Organization identifier, where supported.
    pub org_id : Option< String >,
    /// HTTPS base URL; defaults per provider when unset.
    pub base_url : String,
    /// Per-request HTTP timeout.
    pub timeout : Duration,
    /// Model used when a request omits one.
    pub default_model : String,
    /// Retry parameter overrides.
    pub retry : Option< crate::retry::RetryConfig >,
    /// Rate-limit parameter overrides.
    pub rate_limit : Option< crate::rate_limiter::RateLimitConfig >,
    /// Headers merged into every outbound request.
    pub additional_headers : HashMap< String, String >,
    /// Parameters merged into every outbound JSON body.
    pub additional_params : HashMap< String, serde_json::Value >,
    /// Connection pool sizing and TLS options.
    pub connection_pool : ConnectionPoolConfig,
    /// Health-probe configuration.
    pub health_check : HealthCheckConfig,
  }

  impl ProviderConfig
  {
    /// Construct a minimal, valid configuration for `provider_type` with the
    /// given credential. All other fields take their defaults.
    #[ must_use ]
    #[ inline ]
    pub fn new( provider_type : ProviderType, api_key : impl Into< String > ) -> Self
    {
      Self
      {
        provider_type,
        api_key : api_key.into(),
        org_id : None,
        base_url : String::new(),
        timeout : Duration::from_secs( 60 ),
        default_model : String::new(),
        retry : None,
        rate_limit : None,
        additional_headers : HashMap::new(),
        additional_params : HashMap::new(),
        connection_pool : ConnectionPoolConfig::default(),
        health_check : HealthCheckConfig::default(),
      }
    }

    /// Validate required invariants : a non-empty credential and (if set) a
    /// parseable base URL.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::RuntimeError::InvalidConfig`] when the
    /// credential is empty or the base URL does not parse as a URL.
    #[ inline ]
    pub fn validate( &self ) -> Result< (), crate::error::RuntimeError >
    {
      if self.api_key.trim().is_empty()
      {
        return Err( crate::error::RuntimeError::InvalidConfig( "api_key must not be empty".to_string() ) );
      }
      if !self.base_url.is_empty() && reqwest::Url::parse( &self.base_url ).is_err()
      {
        return Err( crate::error::RuntimeError::InvalidConfig( format!( "base_url is not a valid URL : {}", self.base_url ) ) );
      }
      Ok( () )
    }

    /// Apply a partial update, leaving zero-valued fields untouched.
    ///
    /// "Zero" means : empty string, `None`, and empty map, per field type.
    #[ must_use ]
    #[ inline ]
    pub fn merge_update( mut self, update : ProviderConfigUpdate ) -> Self
    {
      if let Some( api_key ) = update.api_key { if !api_key.is_empty() { self.api_key = api_key; } }
      if let Some( org_id ) = update.org_id { self.org_id = Some( org_id ); }
      if let Some( base_url ) = update.base_url { if !base_url.is_empty() { self.base_url = base_url; } }
      if let Some( timeout ) = update.timeout { if timeout > Duration::ZERO { self.timeout = timeout; } }
      if let Some( default_model ) = update.default_model { if !default_model.is_empty() { self.default_model = default_model; } }
      if let Some( retry ) = update.retry { self.retry = Some( retry ); }
      if let Some( rate_limit ) = update.rate_limit { self.rate_limit = Some( rate_limit ); }
      if !update.additional_headers.is_empty() { self.additional_headers.extend( update.additional_headers ); }
      if !update.additional_params.is_empty() { self.additional_params.extend( update.additional_params ); }
      self
    }
  }

  /// A partial update applied to a [`ProviderConfig`] via `merge_update`.
  #[ derive( Debug, Clone, Default ) ]
  pub struct ProviderConfigUpdate
  {
    /// New credential, if changing.
    pub api_key : Option< String >,
    /// New organization id, if changing.
    pub org_id : Option< String >,
    /// New base URL, if changing.
    pub base_url : Option< String >,
    /// New per-request timeout, if changing.
    pub timeout : Option< Duration >,
    /// New default model, if changing.
    pub default_model : Option< String >,
    /// New retry overrides, if changing.
    pub retry : Option< crate::retry::RetryConfig >,
    /// New rate-limit overrides, if changing.
    pub rate_limit : Option< crate::rate_limiter::RateLimitConfig >,
    /// Headers to merge in.
    pub additional_headers : HashMap< String, String >,
    /// Params to merge in.
    pub additional_params : HashMap< String, serde_json::Value >,
  }

  /// RW-locked map from provider type to its live configuration.
  ///
  /// Writers copy-on-write : a write takes the lock, clones the existing
  /// config, applies the merge, and replaces the map entry in one step.
  #[ derive( Debug, Default ) ]
  pub struct ConfigManager
  {
    configs : RwLock< HashMap< ProviderType, ProviderConfig > >,
  }

  impl ConfigManager
  {
    /// Construct an empty manager.
    #[ must_use ]
    #[ inline ]
    pub fn new() -> Self
    {
      Self { configs : RwLock::new( HashMap::new() ) }
    }

    /// Insert or replace a provider's configuration wholesale.
    #[ inline ]
    pub fn set( &self, config : ProviderConfig )
    {
      let mut guard = self.configs.write().unwrap_or_else( std::sync::PoisonError::into_inner );
      guard.insert( config.provider_type.clone(), config );
    }

    /// Read a defensive copy of a provider's configuration.
    #[ must_use ]
    #[ inline ]
    pub fn get( &self, provider_type : &ProviderType ) -> Option< ProviderConfig >
    {
      let guard = self.configs.read().unwrap_or_else( std::sync::PoisonError::into_inner );
      guard.get( provider_type ).cloned()
    }

    /// Apply a merge-update to a provider's configuration, copy-on-write.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::RuntimeError::NotFound`] if no configuration
    /// is registered yet for `provider_type`.
    #[ inline ]
    pub fn update( &self, provider_type : &ProviderType, update : ProviderConfigUpdate ) -> Result< ProviderConfig, crate::error::RuntimeError >
    {
      let mut guard = self.configs.write().unwrap_or_else( std::sync::PoisonError::into_inner );
      let existing = guard.get( provider_type ).cloned()
        .ok_or_else( || crate::error::RuntimeError::NotFound( format!( "no config for provider {provider_type}" ) ) )?;
      let merged = existing.merge_update( update );
      guard.insert( provider_type.clone(), merged.clone() );
      Ok( merged )
    }
  }

  #[ cfg( test ) ]
  mod tests
  {
    use super::*;
    use crate::types::ProviderType;

  #[ test ]
  fn validate_rejects_empty_api_key()
  {
    let config = ProviderConfig::new( ProviderType::new( "openai" ), "" );
    assert!( config.validate().is_err() );
  }

  #[ test ]
  fn validate_rejects_unparseable_base_url()
  {
    let mut config = ProviderConfig::new( ProviderType::new( "openai" ), "sk-test" );
    config.base_url = "not a url".to_string();
    assert!( config.validate().is_err() );
  }

  #[ test ]
  fn merge_update_preserves_unset_fields()
  {
    let config = ProviderConfig::new( ProviderType::new( "openai" ), "sk-test" );
    let update = ProviderConfigUpdate { org_id : Some( "org-1".to_string() ), ..Default::default() };
    let merged = config.clone().merge_update( update );
    assert_eq!( merged.api_key, config.api_key );
    assert_eq!( merged.org_id.as_deref(), Some( "org-1" ) );
  }

  #[ test ]
  fn merge_update_ignores_zero_valued_fields()
  {
    let config = ProviderConfig::new( ProviderType::new( "openai" ), "sk-test" ).merge_update
    (
      ProviderConfigUpdate { default_model : Some( "gpt-4".to_string() ), ..Default::default() }
    );
    let merged = config.clone().merge_update( ProviderConfigUpdate { default_model : Some( String::new() ), ..Default::default() } );
    assert_eq!( merged.default_model, "gpt-4" );
  }

  #[ test ]
  fn config_manager_set_api_key_then_overwrite_keeps_latest()
  {
    let manager = ConfigManager::new();
    let provider = ProviderType::new( "openai" );
    manager.set( ProviderConfig::new( provider.clone(), "k1" ) );
    manager.update( &provider, ProviderConfigUpdate { api_key : Some( "k2".to_string() ), ..Default::default() } ).unwrap();
    assert_eq!( manager.get( &provider ).unwrap().api_key, "k2" );
  }

  #[ test ]
  fn config_manager_update_missing_provider_errors()
  {
    let manager = ConfigManager::new();
    let result = manager.update( &ProviderType::new( "missing" ), ProviderConfigUpdate::default() );
    assert!( result.is_err() );
  }
  }

} // end mod private

crate::mod_interface!
{
  exposed use
  {
    ConnectionPoolConfig,
    HealthCheckConfig,
    ProviderConfig,
    ProviderConfigUpdate,
    ConfigManager,
  };
}
