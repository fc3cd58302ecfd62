//! Response cache and the cache-aside `CachingProvider` wrapper.
//!
//! Grounded on the teacher's `response_cache.rs` (`CacheEntry`/`CacheKey`/
//! `CacheStatistics` shape, SHA-256 key hashing via `sha2`, `tokio::sync::RwLock`
//! guarding a `HashMap`, values stored pre-serialized as bytes) and
//! `request_cache_enhanced.rs` for the cache-aside wrapper shape. Keys are
//! derived from `"<provider>:<operation>:<canonical-JSON>"` rather than the
//! teacher's method/path/body-hash triple, since this cache sits in front of
//! typed provider calls rather than raw HTTP requests. LFU and FIFO are
//! accepted tokens that degrade to LRU, per spec §9's carried-over deviation.

#[ allow( clippy::missing_inline_in_public_items ) ]
mod private
{
  use crate::error::RuntimeResult;
  use crate::provider::Provider;
  use crate::types::
  {
    Capability, ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse,
    EmbeddingRequest, EmbeddingResponse, ModelInfo, ProviderType, TextCompletionRequest,
    TextCompletionResponse,
  };
  use crate::config::ProviderConfig;
  use crate::rate_limiter::RateLimitConfig;
  use crate::retry::RetryConfig;
  use crate::pipeline::CancellationContext;
  use crate::provider::ChunkCallback;
  use crate::usage::UsageMetrics;
  use serde::{ Serialize, de::DeserializeOwned };
  use sha2::{ Digest, Sha256 };
  use std::collections::{ HashMap, VecDeque };
  use std::sync::atomic::{ AtomicBool, Ordering };
  use std::sync::Arc;
  use std::time::{ Duration, Instant };
  use tokio::sync::RwLock;

  /// TTL applied to cached model-listing results.
  pub const MODEL_LOOKUP_TTL : Duration = Duration::from_secs( 3600 );
  /// TTL applied to cached completion and embedding results.
  pub const COMPLETION_TTL : Duration = Duration::from_secs( 86400 );
  /// TTL applied to cached capability-probe results.
  pub const CAPABILITY_PROBE_TTL : Duration = Duration::from_secs( 3600 );

  /// Eviction strategy for a [`ResponseCache`] once it reaches capacity.
  ///
  /// Only LRU semantics are required to be correct; `Lfu` and `Fifo` are
  /// accepted configuration tokens that degrade to LRU, carried over from a
  /// deviation in the source system recorded as a deliberate spec choice
  /// rather than fabricated as distinct algorithms.
  #[ derive( Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize ) ]
  pub enum EvictionPolicy
  {
    /// Evict the least recently accessed entry.
    Lru,
    /// Accepted, degrades to LRU.
    Lfu,
    /// Accepted, degrades to LRU.
    Fifo,
  }

  impl Default for EvictionPolicy
  {
    #[ inline ]
    fn default() -> Self
    {
      Self::Lru
    }
  }

  /// Tuning parameters for a [`ResponseCache`].
  #[ derive( Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize ) ]
  pub struct CacheConfig
  {
    /// Maximum number of entries held before the eviction policy runs.
    pub max_entries : usize,
    /// Eviction policy applied once at capacity.
    pub eviction_policy : EvictionPolicy,
  }

  impl Default for CacheConfig
  {
    #[ inline ]
    fn default() -> Self
    {
      Self { max_entries : 10_000, eviction_policy : EvictionPolicy::Lru }
    }
  }

  /// Hit/miss/eviction counters for a [`ResponseCache`].
  #[ derive( Debug, Clone, Copy, Default, serde::Serialize, serde::Deserialize ) ]
  pub struct CacheMetrics
  {
    /// Lookups that found a live entry.
    pub hits : u64,
    /// Lookups that found nothing, or only an expired entry.
    pub misses : u64,
    /// Entries removed to make room for a new one.
    pub evictions : u64,
  }

  #[ derive( Debug, Clone ) ]
  struct StoredEntry
  {
    data : Vec< u8 >,
    expires_at : Instant,
  }

  impl StoredEntry
  {
    fn is_expired( &self ) -> bool
    {
      Instant::now() >= self.expires_at
    }
  }

  /// Render a [`serde_json::Value`] to a byte-stable string : object keys are
  /// sorted so two values differing only in map iteration order serialize
  /// identically.
  #[ must_use ]
  pub fn canonical_json( value : &serde_json::Value ) -> String
  {
    match value
    {
      serde_json::Value::Null => "null".to_string(),
      serde_json::Value::Bool( flag ) => flag.to_string(),
      serde_json::Value::Number( number ) => number.to_string(),
      serde_json::Value::String( text ) => serde_json::to_string( text ).unwrap_or_default(),
      serde_json::Value::Array( items ) =>
      {
        let parts : Vec< String > = items.iter().map( canonical_json ).collect();
        format!( "[{}]", parts.join( "," ) )
      }
      serde_json::Value::Object( map ) =>
      {
        let mut keys : Vec< &String > = map.keys().collect();
        keys.sort();
        let parts : Vec< String > = keys.iter()
          .map( | key | format!( "{}:{}", serde_json::to_string( key ).unwrap_or_default(), canonical_json( &map[ *key ] ) ) )
          .collect();
        format!( "{{{}}}", parts.join( "," ) )
      }
    }
  }

  /// Derive a cache key as `SHA-256(hex)` over
  /// `"<providerType>:<operation>:<canonical-JSON(request)>"`.
  #[ must_use ]
  pub fn fingerprint( provider : &ProviderType, operation : &str, request : &impl Serialize ) -> String
  {
    let value = serde_json::to_value( request ).unwrap_or( serde_json::Value::Null );
    let canonical = canonical_json( &value );
    let mut hasher = Sha256::new();
    hasher.update( format!( "{provider}:{operation}:{canonical}" ).as_bytes() );
    format!( "{:x}", hasher.finalize() )
  }

  /// Bounded cache of `(key, value, expiration)` triples with LRU eviction.
  ///
  /// Values are stored pre-serialized, so one cache instance can hold
  /// heterogeneous response types; [`ResponseCache::get`] deserializes into
  /// whatever type the caller names, and a mismatched type is a caller bug
  /// rather than a runtime-checked error, matching [`crate::types::CacheEntry`].
  #[ derive( Debug ) ]
  pub struct ResponseCache
  {
    entries : RwLock< HashMap< String, StoredEntry > >,
    /// Least-recently-used order, oldest at the front.
    order : RwLock< VecDeque< String > >,
    config : CacheConfig,
    metrics : RwLock< CacheMetrics >,
  }

  impl ResponseCache
  {
    /// Construct an empty cache.
    #[ must_use ]
    #[ inline ]
    pub fn new( config : CacheConfig ) -> Self
    {
      Self
      {
        entries : RwLock::new( HashMap::new() ),
        order : RwLock::new( VecDeque::new() ),
        config,
        metrics : RwLock::new( CacheMetrics::default() ),
      }
    }

    /// Look up `key`, deserializing a live entry into `T`. Expired entries
    /// are treated as a miss and removed.
    pub async fn get< T : DeserializeOwned >( &self, key : &str ) -> Option< T >
    {
      let hit = {
        let entries = self.entries.read().await;
        entries.get( key ).filter( | entry | !entry.is_expired() ).map( | entry | entry.data.clone() )
      };

      let mut metrics = self.metrics.write().await;
      match hit
      {
        Some( data ) =>
        {
          metrics.hits += 1;
          drop( metrics );
          self.touch( key ).await;
          serde_json::from_slice( &data ).ok()
        }
        None =>
        {
          metrics.misses += 1;
          drop( metrics );
          self.remove_if_expired( key ).await;
          None
        }
      }
    }

    /// Store `value` under `key` with `ttl`, evicting the least recently
    /// used entry first if the cache is already at capacity.
    pub async fn put< T : Serialize >( &self, key : &str, value : &T, ttl : Duration )
    {
      let Ok( data ) = serde_json::to_vec( value ) else { return };
      let entry = StoredEntry { data, expires_at : Instant::now() + ttl };

      let mut entries = self.entries.write().await;
      if !entries.contains_key( key ) && entries.len() >= self.config.max_entries
      {
        self.evict_one( &mut entries ).await;
      }
      entries.insert( key.to_string(), entry );
      drop( entries );
      self.touch( key ).await;
    }

    /// Remove every entry and reset hit/miss/eviction counters to zero.
    pub async fn clear( &self )
    {
      self.entries.write().await.clear();
      self.order.write().await.clear();
      *self.metrics.write().await = CacheMetrics::default();
    }

    /// Defensive copy of the current hit/miss/eviction counters.
    pub async fn metrics( &self ) -> CacheMetrics
    {
      *self.metrics.read().await
    }

    async fn touch( &self, key : &str )
    {
      let mut order = self.order.write().await;
      order.retain( | existing | existing != key );
      order.push_back( key.to_string() );
    }

    async fn remove_if_expired( &self, key : &str )
    {
      let mut entries = self.entries.write().await;
      if entries.get( key ).is_some_and( StoredEntry::is_expired )
      {
        entries.remove( key );
        self.order.write().await.retain( | existing | existing != key );
      }
    }

    async fn evict_one( &self, entries : &mut HashMap< String, StoredEntry > )
    {
      let evicted_key = self.order.write().await.pop_front();
      if let Some( evicted_key ) = evicted_key
      {
        entries.remove( &evicted_key );
        self.metrics.write().await.evictions += 1;
      }
    }
  }

  /// Cache-aside wrapper : proxies every read-like [`Provider`] operation
  /// through a [`ResponseCache`], delegating straight through when caching
  /// is disabled or for operations the spec excludes from caching.
  ///
  /// `model_info`, `supports_model`, and `supports_capability` are
  /// synchronous, O(1) lookups against the inner provider's already-built
  /// capability index (see [`crate::provider::ProviderCore`]) ; routing them
  /// through the async cache would add lock overhead with no benefit, so
  /// this wrapper delegates them directly rather than fingerprinting and
  /// storing a value that was already free to compute.
  #[ derive( Debug ) ]
  pub struct CachingProvider
  {
    inner : Arc< dyn Provider >,
    cache : Arc< ResponseCache >,
    enabled : AtomicBool,
  }

  impl CachingProvider
  {
    /// Wrap `inner`, caching its read-like operations per `config`.
    #[ must_use ]
    #[ inline ]
    pub fn new( inner : Arc< dyn Provider >, config : CacheConfig ) -> Self
    {
      Self { inner, cache : Arc::new( ResponseCache::new( config ) ), enabled : AtomicBool::new( true ) }
    }

    /// Enable or disable caching; while disabled every call delegates
    /// directly, bypassing both lookup and population.
    #[ inline ]
    pub fn set_enabled( &self, enabled : bool )
    {
      self.enabled.store( enabled, Ordering::SeqCst );
    }

    /// Whether caching is currently enabled.
    #[ must_use ]
    #[ inline ]
    pub fn is_enabled( &self ) -> bool
    {
      self.enabled.load( Ordering::SeqCst )
    }

    /// Defensive copy of the underlying cache's hit/miss/eviction counters.
    pub async fn cache_metrics( &self ) -> CacheMetrics
    {
      self.cache.metrics().await
    }

    /// Drop every cached entry.
    pub async fn clear_cache( &self )
    {
      self.cache.clear().await;
    }
  }

  #[ async_trait::async_trait ]
  impl Provider for CachingProvider
  {
    #[ inline ]
    fn r#type( &self ) -> ProviderType
    {
      self.inner.r#type()
    }

    #[ inline ]
    fn config( &self ) -> ProviderConfig
    {
      self.inner.config()
    }

    async fn list_models( &self ) -> RuntimeResult< Vec< ModelInfo > >
    {
      if !self.is_enabled()
      {
        return self.inner.list_models().await;
      }
      let key = fingerprint( &self.r#type(), "list_models", &() );
      if let Some( cached ) = self.cache.get( &key ).await
      {
        return Ok( cached );
      }
      let result = self.inner.list_models().await?;
      self.cache.put( &key, &result, MODEL_LOOKUP_TTL ).await;
      Ok( result )
    }

    #[ inline ]
    fn model_info( &self, id : &str ) -> Option< ModelInfo >
    {
      self.inner.model_info( id )
    }

    async fn text_completion( &self, ctx : &CancellationContext, request : TextCompletionRequest ) -> RuntimeResult< TextCompletionResponse >
    {
      if !self.is_enabled()
      {
        return self.inner.text_completion( ctx, request ).await;
      }
      let key = fingerprint( &self.r#type(), "text_completion", &request );
      if let Some( cached ) = self.cache.get( &key ).await
      {
        return Ok( cached );
      }
      let result = self.inner.text_completion( ctx, request ).await?;
      self.cache.put( &key, &result, COMPLETION_TTL ).await;
      Ok( result )
    }

    async fn chat_completion( &self, ctx : &CancellationContext, request : ChatCompletionRequest ) -> RuntimeResult< ChatCompletionResponse >
    {
      if !self.is_enabled()
      {
        return self.inner.chat_completion( ctx, request ).await;
      }
      let key = fingerprint( &self.r#type(), "chat_completion", &request );
      if let Some( cached ) = self.cache.get( &key ).await
      {
        return Ok( cached );
      }
      let result = self.inner.chat_completion( ctx, request ).await?;
      self.cache.put( &key, &result, COMPLETION_TTL ).await;
      Ok( result )
    }

    /// Never cached; delegates directly, per spec §4.7.
    #[ inline ]
    async fn streaming_chat_completion( &self, ctx : &CancellationContext, request : ChatCompletionRequest, on_chunk : ChunkCallback< '_ > ) -> RuntimeResult< () >
    {
      self.inner.streaming_chat_completion( ctx, request, on_chunk ).await
    }

    async fn create_embedding( &self, ctx : &CancellationContext, request : EmbeddingRequest ) -> RuntimeResult< EmbeddingResponse >
    {
      if !self.is_enabled()
      {
        return self.inner.create_embedding( ctx, request ).await;
      }
      let key = fingerprint( &self.r#type(), "create_embedding", &request );
      if let Some( cached ) = self.cache.get( &key ).await
      {
        return Ok( cached );
      }
      let result = self.inner.create_embedding( ctx, request ).await?;
      self.cache.put( &key, &result, COMPLETION_TTL ).await;
      Ok( result )
    }

    async fn count_tokens( &self, text : &str, model_id : &str ) -> RuntimeResult< u32 >
    {
      if !self.is_enabled()
      {
        return self.inner.count_tokens( text, model_id ).await;
      }
      let request = serde_json::json!( { "text" : text, "model_id" : model_id } );
      let key = fingerprint( &self.r#type(), "count_tokens", &request );
      if let Some( cached ) = self.cache.get( &key ).await
      {
        return Ok( cached );
      }
      let result = self.inner.count_tokens( text, model_id ).await?;
      self.cache.put( &key, &result, CAPABILITY_PROBE_TTL ).await;
      Ok( result )
    }

    #[ inline ]
    fn supports_model( &self, id : &str ) -> bool
    {
      self.inner.supports_model( id )
    }

    #[ inline ]
    fn supports_capability( &self, capability : Capability ) -> bool
    {
      self.inner.supports_capability( capability )
    }

    #[ inline ]
    async fn close( &self ) -> RuntimeResult< () >
    {
      self.inner.close().await
    }

    #[ inline ]
    fn rate_limit_config( &self ) -> RateLimitConfig
    {
      self.inner.rate_limit_config()
    }

    #[ inline ]
    fn update_rate_limit_config( &self, config : RateLimitConfig )
    {
      self.inner.update_rate_limit_config( config );
    }

    #[ inline ]
    fn retry_config( &self ) -> RetryConfig
    {
      self.inner.retry_config()
    }

    #[ inline ]
    fn update_retry_config( &self, config : RetryConfig )
    {
      self.inner.update_retry_config( config );
    }

    #[ inline ]
    fn usage_metrics( &self, model_id : &str ) -> Option< UsageMetrics >
    {
      self.inner.usage_metrics( model_id )
    }
  }

  #[ allow( clippy::items_after_statements ) ]
  #[ cfg( test ) ]
  mod tests
  {
    use super::*;
    use crate::types::{ ChatChoice, ChatMessage, Role };

    fn provider() -> ProviderType
    {
      ProviderType::new( "openai" )
    }

    #[ test ]
    fn canonical_json_is_independent_of_object_key_order()
    {
      let a = serde_json::json!( { "b" : 1, "a" : 2 } );
      let b = serde_json::json!( { "a" : 2, "b" : 1 } );
      assert_eq!( canonical_json( &a ), canonical_json( &b ) );
    }

    #[ test ]
    fn fingerprint_is_deterministic_for_identical_requests()
    {
      let request = serde_json::json!( { "model" : "gpt-4", "messages" : [ "hi" ] } );
      assert_eq!( fingerprint( &provider(), "chat_completion", &request ), fingerprint( &provider(), "chat_completion", &request ) );
    }

    #[ test ]
    fn fingerprint_differs_by_operation()
    {
      let request = serde_json::json!( { "model" : "gpt-4" } );
      assert_ne!( fingerprint( &provider(), "chat_completion", &request ), fingerprint( &provider(), "text_completion", &request ) );
    }

    #[ tokio::test ]
    async fn cache_hit_skips_recomputation()
    {
      let cache = ResponseCache::new( CacheConfig::default() );
      let key = fingerprint( &provider(), "chat_completion", &serde_json::json!( {} ) );
      assert!( cache.get::< u32 >( &key ).await.is_none() );
      cache.put( &key, &42_u32, Duration::from_secs( 60 ) ).await;
      assert_eq!( cache.get::< u32 >( &key ).await, Some( 42 ) );
      let metrics = cache.metrics().await;
      assert_eq!( metrics.hits, 1 );
      assert_eq!( metrics.misses, 1 );
    }

    #[ tokio::test ]
    async fn expired_entry_is_treated_as_a_miss()
    {
      let cache = ResponseCache::new( CacheConfig::default() );
      cache.put( &"k".to_string(), &7_u32, Duration::from_millis( 1 ) ).await;
      tokio::time::sleep( Duration::from_millis( 10 ) ).await;
      assert!( cache.get::< u32 >( "k" ).await.is_none() );
    }

    #[ tokio::test ]
    async fn over_capacity_evicts_least_recently_used()
    {
      let cache = ResponseCache::new( CacheConfig { max_entries : 2, eviction_policy : EvictionPolicy::Lru } );
      cache.put( &"a".to_string(), &1_u32, Duration::from_secs( 60 ) ).await;
      cache.put( &"b".to_string(), &2_u32, Duration::from_secs( 60 ) ).await;
      // touch "a" so "b" becomes least recently used
      let _ : Option< u32 > = cache.get( "a" ).await;
      cache.put( &"c".to_string(), &3_u32, Duration::from_secs( 60 ) ).await;
      assert!( cache.get::< u32 >( "b" ).await.is_none() );
      assert!( cache.get::< u32 >( "a" ).await.is_some() );
      assert!( cache.get::< u32 >( "c" ).await.is_some() );
      assert_eq!( cache.metrics().await.evictions, 1 );
    }

    #[ derive( Debug ) ]
    struct CountingProvider
    {
      core : Arc< crate::provider::ProviderCore >,
      calls : std::sync::atomic::AtomicU32,
    }

    #[ async_trait::async_trait ]
    impl Provider for CountingProvider
    {
      fn r#type( &self ) -> ProviderType { self.core.provider_type() }
      fn config( &self ) -> ProviderConfig { self.core.config() }
      async fn list_models( &self ) -> RuntimeResult< Vec< ModelInfo > > { Ok( self.core.cached_models() ) }
      fn model_info( &self, id : &str ) -> Option< ModelInfo > { self.core.model_info( id ) }
      async fn text_completion( &self, _ctx : &CancellationContext, _request : TextCompletionRequest ) -> RuntimeResult< TextCompletionResponse >
      {
        unimplemented!()
      }
      async fn chat_completion( &self, _ctx : &CancellationContext, request : ChatCompletionRequest ) -> RuntimeResult< ChatCompletionResponse >
      {
        self.calls.fetch_add( 1, Ordering::SeqCst );
        Ok( ChatCompletionResponse
        {
          model : request.model,
          choices : vec![ ChatChoice { index : 0, message : ChatMessage::new( Role::Assistant, "hi" ), finish_reason : Some( "stop".to_string() ) } ],
          usage : crate::types::TokenUsage::new( 1, 1 ),
        } )
      }
      async fn streaming_chat_completion( &self, _ctx : &CancellationContext, _request : ChatCompletionRequest, _on_chunk : ChunkCallback< '_ > ) -> RuntimeResult< () >
      {
        unimplemented!()
      }
      async fn create_embedding( &self, _ctx : &CancellationContext, _request : EmbeddingRequest ) -> RuntimeResult< EmbeddingResponse >
      {
        unimplemented!()
      }
      async fn count_tokens( &self, _text : &str, _model_id : &str ) -> RuntimeResult< u32 > { Ok( 0 ) }
      fn supports_model( &self, id : &str ) -> bool { self.core.supports_model( id ) }
      fn supports_capability( &self, capability : Capability ) -> bool { self.core.supports_capability( capability ) }
      async fn close( &self ) -> RuntimeResult< () > { Ok( () ) }
      fn rate_limit_config( &self ) -> RateLimitConfig { self.core.rate_limit_config() }
      fn update_rate_limit_config( &self, config : RateLimitConfig ) { self.core.update_rate_limit_config( config ); }
      fn retry_config( &self ) -> RetryConfig { self.core.retry_config() }
      fn update_retry_config( &self, config : RetryConfig ) { self.core.update_retry_config( config ); }
      fn usage_metrics( &self, model_id : &str ) -> Option< UsageMetrics > { self.core.usage_metrics( model_id ) }
    }

    #[ tokio::test ]
    async fn cache_hit_on_identical_request_skips_inner_provider()
    {
      let config = ProviderConfig::new( provider(), "sk-test" );
      let core = Arc::new( crate::provider::ProviderCore::new( config, Arc::new( crate::logging::RequestLogger::default() ) ).unwrap() );
      let counting = Arc::new( CountingProvider { core, calls : std::sync::atomic::AtomicU32::new( 0 ) } );
      let wrapped = CachingProvider::new( counting.clone(), CacheConfig::default() );

      let request = ChatCompletionRequest { model : "gpt-4".to_string(), messages : vec![], sampling : crate::types::SamplingParams::default(), tools : Vec::new(), stream : false };
      let ctx = CancellationContext::new();
      wrapped.chat_completion( &ctx, request.clone() ).await.unwrap();
      wrapped.chat_completion( &ctx, request ).await.unwrap();

      assert_eq!( counting.calls.load( Ordering::SeqCst ), 1 );
      let metrics = wrapped.cache_metrics().await;
      assert_eq!( metrics.hits, 1 );
      assert_eq!( metrics.misses, 1 );
    }
  }

} // end mod private

crate::mod_interface!
{
  exposed use
  {
    MODEL_LOOKUP_TTL,
    COMPLETION_TTL,
    CAPABILITY_PROBE_TTL,
    EvictionPolicy,
    CacheConfig,
    CacheMetrics,
    canonical_json,
    fingerprint,
    ResponseCache,
    CachingProvider,
  };
}
