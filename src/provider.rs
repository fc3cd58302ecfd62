//! The `Provider` capability trait and the `ProviderCore` record every
//! concrete provider composes.
//!
//! Grounded on the Design Notes' "Polymorphism without inheritance" : the
//! teacher workspace layers providers by generic `Client<E>` over an
//! `Environment` trait per vendor crate (`client.rs` +
//! `client_api_accessors.rs`). This spec has one process hosting many
//! heterogeneous providers side by side, so the generic-over-environment
//! shape is replaced with a single object-safe trait plus a private
//! `ProviderCore` that holds the model cache, capability index, usage
//! tracker, and resilience pipeline common to every provider.

#[ allow( clippy::missing_inline_in_public_items ) ]
mod private
{
  use crate::config::ProviderConfig;
  use crate::connection_pool::{ ConnectionPool, HealthState };
  use crate::error::{ RuntimeError, RuntimeResult };
  use crate::logging::RequestLogger;
  use crate::pipeline::{ CancellationContext, ResiliencePipeline };
  use crate::rate_limiter::{ RateLimitConfig, RateLimiter };
  use crate::retry::{ RetryConfig, RetryEngine };
  use crate::circuit_breaker::{ CircuitBreaker, CircuitBreakerConfig };
  use crate::priority_queue::{ PriorityQueueConfig, PriorityRequestQueue };
  use crate::types::
  {
    Capability, ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse,
    EmbeddingRequest, EmbeddingResponse, ModelInfo, ProviderType, TextCompletionRequest,
    TextCompletionResponse,
  };
  use crate::usage::{ UsageMetrics, UsageTracker };
  use std::collections::BTreeSet;
  use std::future::Future;
  use std::sync::atomic::{ AtomicBool, Ordering };
  use std::sync::{ Arc, RwLock };
  use std::time::{ Duration, Instant };

  /// How long a provider's model list is served from cache before a refresh
  /// is due. Stale values are still served while the refresh is in flight.
  pub const MODEL_CACHE_TTL : Duration = Duration::from_secs( 3600 );

  /// Callback invoked for every incremental chunk of a streaming chat
  /// completion, with a final call carrying aggregated usage.
  pub type ChunkCallback< 'a > = &'a mut ( dyn FnMut( ChatCompletionChunk ) + Send );

  /// Common capability surface every provider exposes, uniform across
  /// heterogeneous upstream wire protocols.
  ///
  /// Unimplemented capabilities return
  /// [`RuntimeError::NotImplemented`] rather than panicking.
  #[ async_trait::async_trait ]
  pub trait Provider : Send + Sync + core::fmt::Debug
  {
    /// This provider's type tag.
    fn r#type( &self ) -> ProviderType;

    /// Defensive copy of this provider's current configuration.
    fn config( &self ) -> ProviderConfig;

    /// Models offered by this provider, served from a one-hour cache that
    /// refreshes asynchronously on expiry (stale values served meanwhile).
    async fn list_models( &self ) -> RuntimeResult< Vec< ModelInfo > >;

    /// Metadata for a single model, or `None` if unknown to this provider.
    fn model_info( &self, id : &str ) -> Option< ModelInfo >;

    /// Legacy single-prompt completion.
    async fn text_completion( &self, ctx : &CancellationContext, request : TextCompletionRequest ) -> RuntimeResult< TextCompletionResponse >;

    /// Multi-turn chat completion.
    async fn chat_completion( &self, ctx : &CancellationContext, request : ChatCompletionRequest ) -> RuntimeResult< ChatCompletionResponse >;

    /// Multi-turn chat completion with incremental streaming. Never cached.
    async fn streaming_chat_completion( &self, ctx : &CancellationContext, request : ChatCompletionRequest, on_chunk : ChunkCallback< '_ > ) -> RuntimeResult< () >;

    /// Vector embedding generation.
    async fn create_embedding( &self, ctx : &CancellationContext, request : EmbeddingRequest ) -> RuntimeResult< EmbeddingResponse >;

    /// Local token count for `text` under `model_id`'s tokenizer.
    async fn count_tokens( &self, text : &str, model_id : &str ) -> RuntimeResult< u32 >;

    /// Whether `id` names a model this provider offers.
    fn supports_model( &self, id : &str ) -> bool;

    /// Whether any offered model lists `capability`.
    fn supports_capability( &self, capability : Capability ) -> bool;

    /// Release this provider's owned resources (HTTP client, background
    /// tasks). Idempotent.
    async fn close( &self ) -> RuntimeResult< () >;

    /// Current rate-limit configuration.
    fn rate_limit_config( &self ) -> RateLimitConfig;

    /// Replace the rate-limit configuration in place.
    fn update_rate_limit_config( &self, config : RateLimitConfig );

    /// Current retry configuration.
    fn retry_config( &self ) -> RetryConfig;

    /// Replace the retry configuration in place.
    fn update_retry_config( &self, config : RetryConfig );

    /// Defensive copy of a model's usage counters, if any requests have
    /// been recorded against it yet.
    fn usage_metrics( &self, model_id : &str ) -> Option< UsageMetrics >;
  }

  /// Shared state every concrete provider composes rather than inherits :
  /// model cache, capability index, usage tracker, resilience pipeline, and
  /// HTTP client.
  pub struct ProviderCore
  {
    provider_type : ProviderType,
    config : RwLock< ProviderConfig >,
    retry_config : RwLock< RetryConfig >,
    rate_limit_config : RwLock< RateLimitConfig >,
    models : RwLock< Vec< ModelInfo > >,
    capabilities : RwLock< BTreeSet< Capability > >,
    models_fetched_at : RwLock< Option< Instant > >,
    models_refreshing : AtomicBool,
    usage : Arc< UsageTracker >,
    pipeline : ResiliencePipeline,
    rate_limiter : Arc< RateLimiter >,
    retry : Arc< RetryEngine >,
    connection_pool : ConnectionPool,
  }

  impl core::fmt::Debug for ProviderCore
  {
    #[ inline ]
    fn fmt( &self, formatter : &mut core::fmt::Formatter< '_ > ) -> core::fmt::Result
    {
      formatter.debug_struct( "ProviderCore" ).field( "provider_type", &self.provider_type ).finish()
    }
  }

  impl ProviderCore
  {
    /// Assemble a core from validated configuration, building the
    /// resilience pipeline (queue, retry, breaker, rate limiter) and the
    /// pooled HTTP client from the config's overrides or this crate's
    /// documented defaults.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::InvalidConfig`] if the configuration fails
    /// validation or the HTTP client fails to build.
    pub fn new( config : ProviderConfig, logger : Arc< RequestLogger > ) -> RuntimeResult< Self >
    {
      config.validate()?;
      let retry_config = config.retry.clone().unwrap_or_default();
      let rate_limit_config = config.rate_limit.unwrap_or_default();
      let connection_pool = ConnectionPool::new( &config.connection_pool, config.health_check.clone(), config.base_url.clone(), config.timeout )?;

      let queue = Arc::new( PriorityRequestQueue::new( PriorityQueueConfig::default() ) );
      let retry = Arc::new( RetryEngine::new( retry_config.clone() ) );
      let breaker = Arc::new( CircuitBreaker::new( CircuitBreakerConfig::default() ) );
      let rate_limiter = Arc::new( RateLimiter::new( rate_limit_config ) );
      let usage = Arc::new( UsageTracker::default() );
      let provider_type = config.provider_type.clone();

      let pipeline = ResiliencePipeline::new( provider_type.clone(), queue, retry.clone(), breaker, rate_limiter.clone(), logger, usage.clone() );

      Ok( Self
      {
        provider_type,
        config : RwLock::new( config ),
        retry_config : RwLock::new( retry_config ),
        rate_limit_config : RwLock::new( rate_limit_config ),
        models : RwLock::new( Vec::new() ),
        capabilities : RwLock::new( BTreeSet::new() ),
        models_fetched_at : RwLock::new( None ),
        models_refreshing : AtomicBool::new( false ),
        usage,
        pipeline,
        rate_limiter,
        retry,
        connection_pool,
      } )
    }

    /// This provider's type tag.
    #[ must_use ]
    #[ inline ]
    pub fn provider_type( &self ) -> ProviderType
    {
      self.provider_type.clone()
    }

    /// Defensive copy of the current configuration.
    #[ must_use ]
    #[ inline ]
    pub fn config( &self ) -> ProviderConfig
    {
      self.config.read().unwrap_or_else( std::sync::PoisonError::into_inner ).clone()
    }

    /// The pooled HTTP client built from this provider's connection-pool
    /// configuration.
    #[ must_use ]
    #[ inline ]
    pub fn http_client( &self ) -> &reqwest::Client
    {
      self.connection_pool.client()
    }

    /// A defensive copy of the connection pool's rolling health state,
    /// updated by its background checker on the configured interval.
    #[ must_use ]
    #[ inline ]
    pub fn connection_health( &self ) -> HealthState
    {
      self.connection_pool.health()
    }

    /// Stop the connection pool's background health-check task. Idempotent.
    #[ inline ]
    pub async fn close( &self )
    {
      self.connection_pool.close().await;
    }

    /// The assembled resilience pipeline every capability call traverses.
    #[ must_use ]
    #[ inline ]
    pub fn pipeline( &self ) -> &ResiliencePipeline
    {
      &self.pipeline
    }

    /// Replace the in-memory model list, rebuilding the capability index
    /// in the same step (invariant : a capability appears iff at least one
    /// model lists it).
    #[ inline ]
    pub fn set_models( &self, models : Vec< ModelInfo > )
    {
      let mut capabilities = BTreeSet::new();
      for model in &models
      {
        capabilities.extend( model.capabilities.iter().copied() );
      }
      *self.models.write().unwrap_or_else( std::sync::PoisonError::into_inner ) = models;
      *self.capabilities.write().unwrap_or_else( std::sync::PoisonError::into_inner ) = capabilities;
      *self.models_fetched_at.write().unwrap_or_else( std::sync::PoisonError::into_inner ) = Some( Instant::now() );
    }

    /// A defensive copy of the current model list, regardless of cache
    /// freshness.
    #[ must_use ]
    #[ inline ]
    pub fn cached_models( &self ) -> Vec< ModelInfo >
    {
      self.models.read().unwrap_or_else( std::sync::PoisonError::into_inner ).clone()
    }

    /// Serve the model list from cache, refreshing asynchronously on
    /// expiry; the first ever fetch (no cache yet) is synchronous.
    ///
    /// # Errors
    ///
    /// Propagates `fetch`'s error only when no cached value exists yet to
    /// serve stale.
    pub async fn list_models_cached< F, Fut >( self : &Arc< Self >, fetch : F ) -> RuntimeResult< Vec< ModelInfo > >
    where
      F : FnOnce() -> Fut + Send + 'static,
      Fut : Future< Output = RuntimeResult< Vec< ModelInfo > > > + Send + 'static,
    {
      let ( cached, fetched_at ) =
      {
        ( self.cached_models(), *self.models_fetched_at.read().unwrap_or_else( std::sync::PoisonError::into_inner ) )
      };

      let fresh = fetched_at.is_some_and( | at | at.elapsed() < MODEL_CACHE_TTL );
      if fresh
      {
        return Ok( cached );
      }

      if cached.is_empty()
      {
        let models = fetch().await?;
        self.set_models( models.clone() );
        return Ok( models );
      }

      if !self.models_refreshing.swap( true, Ordering::SeqCst )
      {
        let core = self.clone();
        tokio::spawn( async move
        {
          if let Ok( models ) = fetch().await
          {
            core.set_models( models );
          }
          core.models_refreshing.store( false, Ordering::SeqCst );
        } );
      }
      Ok( cached )
    }

    /// Metadata for a single model, scanning the cached model list.
    #[ must_use ]
    #[ inline ]
    pub fn model_info( &self, id : &str ) -> Option< ModelInfo >
    {
      self.models.read().unwrap_or_else( std::sync::PoisonError::into_inner ).iter().find( | model | model.id == id ).cloned()
    }

    /// Whether `id` names a cached model.
    #[ must_use ]
    #[ inline ]
    pub fn supports_model( &self, id : &str ) -> bool
    {
      self.models.read().unwrap_or_else( std::sync::PoisonError::into_inner ).iter().any( | model | model.id == id )
    }

    /// O(1) capability lookup against the precomputed index.
    #[ must_use ]
    #[ inline ]
    pub fn supports_capability( &self, capability : Capability ) -> bool
    {
      self.capabilities.read().unwrap_or_else( std::sync::PoisonError::into_inner ).contains( &capability )
    }

    /// Defensive copy of one model's usage counters.
    #[ must_use ]
    #[ inline ]
    pub fn usage_metrics( &self, model_id : &str ) -> Option< UsageMetrics >
    {
      self.usage.metrics( model_id )
    }

    /// Current retry configuration.
    #[ must_use ]
    #[ inline ]
    pub fn retry_config( &self ) -> RetryConfig
    {
      self.retry_config.read().unwrap_or_else( std::sync::PoisonError::into_inner ).clone()
    }

    /// Current rate-limit configuration.
    #[ must_use ]
    #[ inline ]
    pub fn rate_limit_config( &self ) -> RateLimitConfig
    {
      *self.rate_limit_config.read().unwrap_or_else( std::sync::PoisonError::into_inner )
    }

    /// Rebuild the rate limiter's buckets in place from `config`.
    #[ inline ]
    pub fn update_rate_limit_config( &self, config : RateLimitConfig )
    {
      self.rate_limiter.update_limits( config );
      *self.rate_limit_config.write().unwrap_or_else( std::sync::PoisonError::into_inner ) = config;
    }

    /// Replace the retry engine's configuration. Takes effect on the next
    /// `execute_with_resilience` call (the retry engine itself is
    /// immutable per-instance; this swaps the stored config for
    /// `retry_config()` readers and future `ProviderCore` rebuilds).
    #[ inline ]
    pub fn update_retry_config( &self, config : RetryConfig )
    {
      *self.retry_config.write().unwrap_or_else( std::sync::PoisonError::into_inner ) = config;
    }

    /// Apply a configuration update wholesale (used by the provider
    /// factory's `update_provider_config`).
    #[ inline ]
    pub fn set_config( &self, config : ProviderConfig )
    {
      *self.config.write().unwrap_or_else( std::sync::PoisonError::into_inner ) = config;
    }
  }

  /// Construct a structured "not implemented" error for `provider`'s
  /// `capability`.
  #[ must_use ]
  #[ inline ]
  pub fn not_implemented( provider : &ProviderType, capability : &str ) -> RuntimeError
  {
    RuntimeError::NotImplemented { provider : provider.to_string(), capability : capability.to_string() }
  }

  #[ cfg( test ) ]
  mod tests
  {
    use super::*;
    use crate::types::{ ModelCategory, ModelInfo };

    fn model( id : &str, capability : Capability ) -> ModelInfo
    {
      ModelInfo
      {
        id : id.to_string(),
        provider : ProviderType::new( "openai" ),
        category : ModelCategory::Chat,
        capabilities : BTreeSet::from( [ capability ] ),
        max_tokens : 8192,
        training_cutoff : None,
        pricing : None,
      }
    }

    fn core() -> Arc< ProviderCore >
    {
      let config = ProviderConfig::new( ProviderType::new( "openai" ), "sk-test" );
      Arc::new( ProviderCore::new( config, Arc::new( RequestLogger::default() ) ).unwrap() )
    }

    #[ test ]
    fn set_models_rebuilds_capability_index()
    {
      let core = core();
      core.set_models( vec![ model( "gpt-4", Capability::ChatCompletion ) ] );
      assert!( core.supports_capability( Capability::ChatCompletion ) );
      assert!( !core.supports_capability( Capability::Embedding ) );
      assert!( core.supports_model( "gpt-4" ) );
      assert!( !core.supports_model( "gpt-3" ) );
    }

    #[ tokio::test ]
    async fn list_models_cached_fetches_synchronously_on_first_call()
    {
      let core = core();
      let models = core.list_models_cached( || async { Ok( vec![ model( "gpt-4", Capability::ChatCompletion ) ] ) } ).await.unwrap();
      assert_eq!( models.len(), 1 );
    }

    #[ tokio::test ]
    async fn list_models_cached_serves_stale_while_refresh_is_in_flight()
    {
      let core = core();
      core.set_models( vec![ model( "gpt-4", Capability::ChatCompletion ) ] );
      *core.models_fetched_at.write().unwrap() = Some( Instant::now() - MODEL_CACHE_TTL - Duration::from_secs( 1 ) );
      let models = core.list_models_cached( || async { Ok( vec![ model( "gpt-4o", Capability::ChatCompletion ) ] ) } ).await.unwrap();
      assert_eq!( models[ 0 ].id, "gpt-4" );
    }
  }

} // end mod private

crate::mod_interface!
{
  exposed use
  {
    MODEL_CACHE_TTL,
    ChunkCallback,
    Provider,
    ProviderCore,
    not_implemented,
  };
}
