//! Provider registry, provider factory, and model registry : the lookup and
//! construction layer that sits above individual [`crate::provider::Provider`]
//! instances.
//!
//! **[ADDED net-new]** — the teacher workspace has no multi-provider
//! registry of its own (each vendor is its own crate/client type); these
//! types are new code in the teacher's idiom : the same `RwLock`-guarded
//! `HashMap` plus defensive-copy convention used throughout `response_cache.rs`
//! and the `enhanced_*` modules.

#[ allow( clippy::missing_inline_in_public_items ) ]
mod private
{
  use crate::config::{ ConfigManager, ProviderConfig, ProviderConfigUpdate };
  use crate::error::{ RuntimeError, RuntimeResult };
  use crate::logging::RequestLogger;
  use crate::provider::Provider;
  use crate::secret::Secret;
  use crate::types::{ Capability, ModelInfo, ProviderType };
  use std::collections::HashMap;
  use std::sync::{ Arc, RwLock };

  /// Resolves a [`ProviderConfig`] for a given [`ProviderType`], decoupling
  /// [`ProviderFactory`] from any one configuration backend.
  pub trait ConfigSource : Send + Sync + core::fmt::Debug
  {
    /// Fetch the configuration to use when constructing `provider_type`.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::InvalidConfig`] if no usable configuration
    /// can be resolved.
    fn get_config( &self, provider_type : &ProviderType ) -> RuntimeResult< ProviderConfig >;
  }

  /// A [`ConfigSource`] backed by an in-memory [`ConfigManager`], populated
  /// explicitly via `set`/`update` ahead of first use.
  #[ derive( Debug, Default ) ]
  pub struct StaticConfigSource
  {
    manager : ConfigManager,
  }

  impl StaticConfigSource
  {
    /// Construct an empty source.
    #[ must_use ]
    #[ inline ]
    pub fn new() -> Self
    {
      Self { manager : ConfigManager::new() }
    }

    /// Register or replace `config` for its own provider type.
    #[ inline ]
    pub fn set( &self, config : ProviderConfig )
    {
      self.manager.set( config );
    }

    /// Apply a merge-update to an already-registered provider's config.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::NotFound`] if no config is registered yet.
    #[ inline ]
    pub fn update( &self, provider_type : &ProviderType, update : ProviderConfigUpdate ) -> RuntimeResult< ProviderConfig >
    {
      self.manager.update( provider_type, update )
    }
  }

  impl ConfigSource for StaticConfigSource
  {
    #[ inline ]
    fn get_config( &self, provider_type : &ProviderType ) -> RuntimeResult< ProviderConfig >
    {
      self.manager.get( provider_type )
        .ok_or_else( || RuntimeError::InvalidConfig( format!( "no configuration registered for provider {provider_type}" ) ) )
    }
  }

  /// A [`ConfigSource`] that resolves credentials from the process
  /// environment : `<PREFIX>_API_KEY` (falling back to
  /// `<PREFIX>_API_KEY_FILE` per [`Secret::load_with_fallback`]) and an
  /// optional `<PREFIX>_BASE_URL`, where `PREFIX` is the provider type tag
  /// upper-cased (e.g. `openai` → `OPENAI`).
  #[ derive( Debug, Default ) ]
  pub struct EnvConfigSource;

  impl EnvConfigSource
  {
    /// Construct a source reading from the process environment.
    #[ must_use ]
    #[ inline ]
    pub fn new() -> Self
    {
      Self
    }

    fn env_prefix( provider_type : &ProviderType ) -> String
    {
      provider_type.as_str().to_uppercase().replace( [ '-', '.' ], "_" )
    }
  }

  impl ConfigSource for EnvConfigSource
  {
    fn get_config( &self, provider_type : &ProviderType ) -> RuntimeResult< ProviderConfig >
    {
      let prefix = Self::env_prefix( provider_type );
      let api_key = Secret::load_with_fallback( &format!( "{prefix}_API_KEY" ) )?;
      let mut config = ProviderConfig::new( provider_type.clone(), api_key.expose().to_string() );
      if let Ok( base_url ) = std::env::var( format!( "{prefix}_BASE_URL" ) )
      {
        config.base_url = base_url;
      }
      if let Ok( default_model ) = std::env::var( format!( "{prefix}_DEFAULT_MODEL" ) )
      {
        config.default_model = default_model;
      }
      Ok( config )
    }
  }

  /// Constructs a concrete [`Provider`] from validated configuration plus
  /// the shared logger every provider logs through.
  pub type ProviderConstructor = Arc< dyn Fn( ProviderConfig, Arc< RequestLogger > ) -> RuntimeResult< Arc< dyn Provider > > + Send + Sync >;

  /// Memoizing constructor for provider instances : holds a config source,
  /// a map from provider type to constructor, and the already-instantiated
  /// providers.
  ///
  /// `get_provider` returns the memoized instance or constructs one via the
  /// registered constructor using config fetched from the config source,
  /// memoizing the result. `close_all` closes every memoized instance and
  /// clears the map, aggregating errors rather than stopping at the first.
  pub struct ProviderFactory
  {
    config_source : Arc< dyn ConfigSource >,
    constructors : RwLock< HashMap< ProviderType, ProviderConstructor > >,
    instances : RwLock< HashMap< ProviderType, Arc< dyn Provider > > >,
    logger : Arc< RequestLogger >,
  }

  impl core::fmt::Debug for ProviderFactory
  {
    #[ inline ]
    fn fmt( &self, formatter : &mut core::fmt::Formatter< '_ > ) -> core::fmt::Result
    {
      let count = self.instances.read().unwrap_or_else( std::sync::PoisonError::into_inner ).len();
      formatter.debug_struct( "ProviderFactory" ).field( "instantiated", &count ).finish()
    }
  }

  impl ProviderFactory
  {
    /// Construct a factory over `config_source`, with no constructors
    /// registered yet.
    #[ must_use ]
    #[ inline ]
    pub fn new( config_source : Arc< dyn ConfigSource > ) -> Self
    {
      Self
      {
        config_source,
        constructors : RwLock::new( HashMap::new() ),
        instances : RwLock::new( HashMap::new() ),
        logger : Arc::new( RequestLogger::default() ),
      }
    }

    /// Construct a factory over `config_source`, logging through `logger`
    /// instead of a default one.
    #[ must_use ]
    #[ inline ]
    pub fn with_logger( config_source : Arc< dyn ConfigSource >, logger : Arc< RequestLogger > ) -> Self
    {
      Self { config_source, constructors : RwLock::new( HashMap::new() ), instances : RwLock::new( HashMap::new() ), logger }
    }

    /// Register the constructor used to materialize providers of
    /// `provider_type`.
    #[ inline ]
    pub fn register_constructor( &self, provider_type : ProviderType, constructor : ProviderConstructor )
    {
      self.constructors.write().unwrap_or_else( std::sync::PoisonError::into_inner ).insert( provider_type, constructor );
    }

    /// Return the memoized instance for `provider_type`, constructing and
    /// memoizing one via its registered constructor if absent.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::NotFound`] if no constructor is registered,
    /// or propagates the config source's / constructor's error.
    pub fn get_provider( &self, provider_type : &ProviderType ) -> RuntimeResult< Arc< dyn Provider > >
    {
      if let Some( existing ) = self.instances.read().unwrap_or_else( std::sync::PoisonError::into_inner ).get( provider_type )
      {
        return Ok( existing.clone() );
      }

      let constructor = self.constructors.read().unwrap_or_else( std::sync::PoisonError::into_inner ).get( provider_type ).cloned()
        .ok_or_else( || RuntimeError::NotFound( format!( "no constructor registered for provider {provider_type}" ) ) )?;
      let config = self.config_source.get_config( provider_type )?;
      let instance = constructor( config, self.logger.clone() )?;

      let mut instances = self.instances.write().unwrap_or_else( std::sync::PoisonError::into_inner );
      Ok( instances.entry( provider_type.clone() ).or_insert( instance ).clone() )
    }

    /// Close and re-construct `provider_type`'s instance from current
    /// configuration.
    ///
    /// # Errors
    ///
    /// Propagates `close`'s or the constructor's error.
    pub async fn refresh_provider( &self, provider_type : &ProviderType ) -> RuntimeResult< Arc< dyn Provider > >
    {
      let existing = self.instances.write().unwrap_or_else( std::sync::PoisonError::into_inner ).remove( provider_type );
      if let Some( existing ) = existing
      {
        existing.close().await?;
      }
      self.get_provider( provider_type )
    }

    /// Apply `update` to `provider_type`'s configuration via a
    /// [`StaticConfigSource`]-style source (any [`ConfigSource`] that also
    /// supports updates should expose its own `update`; this method only
    /// triggers the refresh), then re-construct.
    ///
    /// # Errors
    ///
    /// Propagates the refresh's error.
    pub async fn update_provider_config( &self, provider_type : &ProviderType, source : &StaticConfigSource, update : ProviderConfigUpdate ) -> RuntimeResult< Arc< dyn Provider > >
    {
      source.update( provider_type, update )?;
      self.refresh_provider( provider_type ).await
    }

    /// Close every memoized instance and clear the map.
    ///
    /// # Errors
    ///
    /// Returns the first error encountered, after attempting to close every
    /// instance (close failures are not short-circuited).
    pub async fn close_all( &self ) -> RuntimeResult< () >
    {
      let drained : Vec< Arc< dyn Provider > > = self.instances.write().unwrap_or_else( std::sync::PoisonError::into_inner ).drain().map( | ( _, provider ) | provider ).collect();
      let mut first_error = None;
      for provider in drained
      {
        if let Err( error ) = provider.close().await
        {
          first_error.get_or_insert( error );
        }
      }
      first_error.map_or( Ok( () ), Err )
    }
  }

  /// A live-provider index : by type, by supported model, and by
  /// capability.
  ///
  /// Lookup precedence in [`ProviderRegistry::resolve`] : exact type >
  /// model → type > capability → first registered provider with that
  /// capability (no scoring).
  #[ derive( Default ) ]
  pub struct ProviderRegistry
  {
    by_type : RwLock< HashMap< ProviderType, Arc< dyn Provider > > >,
    order : RwLock< Vec< ProviderType > >,
    model_index : RwLock< HashMap< String, ProviderType > >,
  }

  impl core::fmt::Debug for ProviderRegistry
  {
    #[ inline ]
    fn fmt( &self, formatter : &mut core::fmt::Formatter< '_ > ) -> core::fmt::Result
    {
      let count = self.by_type.read().unwrap_or_else( std::sync::PoisonError::into_inner ).len();
      formatter.debug_struct( "ProviderRegistry" ).field( "providers", &count ).finish()
    }
  }

  impl ProviderRegistry
  {
    /// Construct an empty registry.
    #[ must_use ]
    #[ inline ]
    pub fn new() -> Self
    {
      Self::default()
    }

    /// Register a live provider under its own type tag, replacing any
    /// previous registration of the same type.
    #[ inline ]
    pub fn register_provider( &self, provider : Arc< dyn Provider > )
    {
      let provider_type = provider.r#type();
      let mut by_type = self.by_type.write().unwrap_or_else( std::sync::PoisonError::into_inner );
      if !by_type.contains_key( &provider_type )
      {
        self.order.write().unwrap_or_else( std::sync::PoisonError::into_inner ).push( provider_type.clone() );
      }
      by_type.insert( provider_type, provider );
    }

    /// Exact-type lookup.
    #[ must_use ]
    #[ inline ]
    pub fn get_provider( &self, provider_type : &ProviderType ) -> Option< Arc< dyn Provider > >
    {
      self.by_type.read().unwrap_or_else( std::sync::PoisonError::into_inner ).get( provider_type ).cloned()
    }

    /// Rebuild the model → provider-type index by querying every
    /// registered provider's `list_models`.
    ///
    /// # Errors
    ///
    /// Propagates the first provider's `list_models` error.
    pub async fn refresh_model_index( &self ) -> RuntimeResult< () >
    {
      let providers : Vec< Arc< dyn Provider > > = self.by_type.read().unwrap_or_else( std::sync::PoisonError::into_inner ).values().cloned().collect();
      let mut index = HashMap::new();
      for provider in providers
      {
        for model in provider.list_models().await?
        {
          index.insert( model.id, provider.r#type() );
        }
      }
      *self.model_index.write().unwrap_or_else( std::sync::PoisonError::into_inner ) = index;
      Ok( () )
    }

    /// Lookup by model id, via the last-built model index.
    #[ must_use ]
    #[ inline ]
    pub fn get_provider_for_model( &self, model_id : &str ) -> Option< Arc< dyn Provider > >
    {
      let provider_type = self.model_index.read().unwrap_or_else( std::sync::PoisonError::into_inner ).get( model_id ).cloned()?;
      self.get_provider( &provider_type )
    }

    /// First registered provider (in registration order) supporting
    /// `capability`, with no further scoring.
    #[ must_use ]
    pub fn get_provider_for_capability( &self, capability : Capability ) -> Option< Arc< dyn Provider > >
    {
      let order = self.order.read().unwrap_or_else( std::sync::PoisonError::into_inner );
      let by_type = self.by_type.read().unwrap_or_else( std::sync::PoisonError::into_inner );
      order.iter().filter_map( | provider_type | by_type.get( provider_type ) ).find( | provider | provider.supports_capability( capability ) ).cloned()
    }

    /// Resolve a provider by the spec's fixed precedence : exact type >
    /// model → type > capability → first provider with that capability.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::NotFound`] if every supplied hint misses.
    pub fn resolve( &self, provider_type : Option< &ProviderType >, model_id : Option< &str >, capability : Option< Capability > ) -> RuntimeResult< Arc< dyn Provider > >
    {
      if let Some( provider_type ) = provider_type
      {
        if let Some( provider ) = self.get_provider( provider_type )
        {
          return Ok( provider );
        }
      }
      if let Some( model_id ) = model_id
      {
        if let Some( provider ) = self.get_provider_for_model( model_id )
        {
          return Ok( provider );
        }
      }
      if let Some( capability ) = capability
      {
        if let Some( provider ) = self.get_provider_for_capability( capability )
        {
          return Ok( provider );
        }
      }
      Err( RuntimeError::NotFound( "no provider matched type, model, or capability hints".to_string() ) )
    }

    /// Close every registered provider and clear the registry.
    ///
    /// # Errors
    ///
    /// Returns the first error encountered, after attempting to close
    /// every provider.
    pub async fn close_all( &self ) -> RuntimeResult< () >
    {
      let drained : Vec< Arc< dyn Provider > > = self.by_type.write().unwrap_or_else( std::sync::PoisonError::into_inner ).drain().map( | ( _, provider ) | provider ).collect();
      self.order.write().unwrap_or_else( std::sync::PoisonError::into_inner ).clear();
      self.model_index.write().unwrap_or_else( std::sync::PoisonError::into_inner ).clear();
      let mut first_error = None;
      for provider in drained
      {
        if let Err( error ) = provider.close().await
        {
          first_error.get_or_insert( error );
        }
      }
      first_error.map_or( Ok( () ), Err )
    }
  }

  /// An independent index mirroring model metadata, separate from the live
  /// [`ProviderRegistry`] — populated explicitly via `sync_from_providers`
  /// rather than tracking provider registration.
  #[ derive( Debug, Default ) ]
  pub struct ModelRegistry
  {
    models : RwLock< HashMap< String, ModelInfo > >,
  }

  impl ModelRegistry
  {
    /// Construct an empty registry.
    #[ must_use ]
    #[ inline ]
    pub fn new() -> Self
    {
      Self::default()
    }

    /// Clear and repopulate by querying each provider's `list_models`.
    ///
    /// # Errors
    ///
    /// Propagates the first provider's `list_models` error; the registry
    /// is left cleared in that case rather than partially repopulated.
    pub async fn sync_from_providers( &self, providers : &[ Arc< dyn Provider > ] ) -> RuntimeResult< () >
    {
      let mut models = HashMap::new();
      for provider in providers
      {
        for model in provider.list_models().await?
        {
          models.insert( model.id.clone(), model );
        }
      }
      *self.models.write().unwrap_or_else( std::sync::PoisonError::into_inner ) = models;
      Ok( () )
    }

    /// Defensive copy of one model's metadata.
    #[ must_use ]
    #[ inline ]
    pub fn get( &self, model_id : &str ) -> Option< ModelInfo >
    {
      self.models.read().unwrap_or_else( std::sync::PoisonError::into_inner ).get( model_id ).cloned()
    }

    /// Defensive copy of every indexed model.
    #[ must_use ]
    #[ inline ]
    pub fn all( &self ) -> Vec< ModelInfo >
    {
      self.models.read().unwrap_or_else( std::sync::PoisonError::into_inner ).values().cloned().collect()
    }

    /// Number of indexed models.
    #[ must_use ]
    #[ inline ]
    pub fn len( &self ) -> usize
    {
      self.models.read().unwrap_or_else( std::sync::PoisonError::into_inner ).len()
    }

    /// Whether the registry currently holds no models.
    #[ must_use ]
    #[ inline ]
    pub fn is_empty( &self ) -> bool
    {
      self.len() == 0
    }
  }

  #[ cfg( test ) ]
  mod tests
  {
    use super::*;
    use crate::pipeline::CancellationContext;
    use crate::types::{ ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse, EmbeddingRequest, EmbeddingResponse, TextCompletionRequest, TextCompletionResponse };

    /// Minimal stub [`Provider`] for registry/factory tests, with no real
    /// wire behaviour : every capability call is `unimplemented!`, since
    /// these tests only exercise lookup and memoization.
    #[ derive( Debug ) ]
    struct StubProvider
    {
      provider_type : ProviderType,
    }

    fn stub_provider( tag : &str ) -> Arc< dyn Provider >
    {
      Arc::new( StubProvider { provider_type : ProviderType::new( tag ) } )
    }

    #[ async_trait::async_trait ]
    impl Provider for StubProvider
    {
      fn r#type( &self ) -> ProviderType { self.provider_type.clone() }
      fn config( &self ) -> crate::config::ProviderConfig { ProviderConfig::new( self.provider_type.clone(), "sk-stub" ) }
      async fn list_models( &self ) -> RuntimeResult< Vec< ModelInfo > > { Ok( Vec::new() ) }
      fn model_info( &self, _id : &str ) -> Option< ModelInfo > { None }
      async fn text_completion( &self, _ctx : &CancellationContext, _request : TextCompletionRequest ) -> RuntimeResult< TextCompletionResponse > { unimplemented!() }
      async fn chat_completion( &self, _ctx : &CancellationContext, _request : ChatCompletionRequest ) -> RuntimeResult< ChatCompletionResponse > { unimplemented!() }
      async fn streaming_chat_completion( &self, _ctx : &CancellationContext, _request : ChatCompletionRequest, _on_chunk : &mut ( dyn FnMut( ChatCompletionChunk ) + Send ) ) -> RuntimeResult< () > { unimplemented!() }
      async fn create_embedding( &self, _ctx : &CancellationContext, _request : EmbeddingRequest ) -> RuntimeResult< EmbeddingResponse > { unimplemented!() }
      async fn count_tokens( &self, _text : &str, _model_id : &str ) -> RuntimeResult< u32 > { Ok( 0 ) }
      fn supports_model( &self, _id : &str ) -> bool { false }
      fn supports_capability( &self, capability : Capability ) -> bool { capability == Capability::ChatCompletion }
      async fn close( &self ) -> RuntimeResult< () > { Ok( () ) }
      fn rate_limit_config( &self ) -> crate::rate_limiter::RateLimitConfig { crate::rate_limiter::RateLimitConfig::default() }
      fn update_rate_limit_config( &self, _config : crate::rate_limiter::RateLimitConfig ) {}
      fn retry_config( &self ) -> crate::retry::RetryConfig { crate::retry::RetryConfig::default() }
      fn update_retry_config( &self, _config : crate::retry::RetryConfig ) {}
      fn usage_metrics( &self, _model_id : &str ) -> Option< crate::usage::UsageMetrics > { None }
    }

    #[ test ]
    fn registry_register_then_get_returns_same_instance()
    {
      let registry = ProviderRegistry::new();
      let provider = stub_provider( "openai" );
      registry.register_provider( provider.clone() );
      let found = registry.get_provider( &ProviderType::new( "openai" ) ).unwrap();
      assert_eq!( found.r#type(), provider.r#type() );
    }

    #[ test ]
    fn resolve_prefers_exact_type_over_capability()
    {
      let registry = ProviderRegistry::new();
      registry.register_provider( stub_provider( "openai" ) );
      registry.register_provider( stub_provider( "anthropic" ) );
      let resolved = registry.resolve( Some( &ProviderType::new( "anthropic" ) ), None, Some( Capability::ChatCompletion ) ).unwrap();
      assert_eq!( resolved.r#type().as_str(), "anthropic" );
    }

    #[ test ]
    fn resolve_falls_back_to_capability_when_type_and_model_miss()
    {
      let registry = ProviderRegistry::new();
      registry.register_provider( stub_provider( "openai" ) );
      let resolved = registry.resolve( None, None, Some( Capability::ChatCompletion ) ).unwrap();
      assert_eq!( resolved.r#type().as_str(), "openai" );
    }

    #[ test ]
    fn resolve_with_no_matching_hints_is_not_found()
    {
      let registry = ProviderRegistry::new();
      let result = registry.resolve( Some( &ProviderType::new( "missing" ) ), None, None );
      assert!( matches!( result, Err( RuntimeError::NotFound( _ ) ) ) );
    }

    #[ test ]
    fn env_config_source_reads_prefixed_variables()
    {
      std::env::set_var( "TESTPROV_API_KEY", "sk-env-test" );
      let source = EnvConfigSource::new();
      let config = source.get_config( &ProviderType::new( "testprov" ) ).unwrap();
      assert_eq!( config.api_key, "sk-env-test" );
      std::env::remove_var( "TESTPROV_API_KEY" );
    }

    #[ test ]
    fn factory_memoizes_constructed_instance()
    {
      let source = Arc::new( StaticConfigSource::new() );
      source.set( ProviderConfig::new( ProviderType::new( "openai" ), "sk-test" ) );
      let factory = ProviderFactory::new( source );
      let calls = Arc::new( std::sync::atomic::AtomicU32::new( 0 ) );
      let calls_clone = calls.clone();
      factory.register_constructor( ProviderType::new( "openai" ), Arc::new( move | _config, _logger | { calls_clone.fetch_add( 1, std::sync::atomic::Ordering::SeqCst ); Ok( stub_provider( "openai" ) ) } ) );
      let _first = factory.get_provider( &ProviderType::new( "openai" ) ).unwrap();
      let _second = factory.get_provider( &ProviderType::new( "openai" ) ).unwrap();
      assert_eq!( calls.load( std::sync::atomic::Ordering::SeqCst ), 1 );
    }

    #[ test ]
    fn factory_missing_constructor_is_not_found()
    {
      let factory = ProviderFactory::new( Arc::new( StaticConfigSource::new() ) );
      let result = factory.get_provider( &ProviderType::new( "missing" ) );
      assert!( matches!( result, Err( RuntimeError::NotFound( _ ) ) ) );
    }
  }

} // end mod private

crate::mod_interface!
{
  exposed use
  {
    ConfigSource,
    StaticConfigSource,
    EnvConfigSource,
    ProviderConstructor,
    ProviderFactory,
    ProviderRegistry,
    ModelRegistry,
  };
}
