//! Per-provider pipeline assembly : the fixed composition every capability
//! call traverses — priority queue, retry, circuit breaker, rate limiter —
//! wrapped with request/response logging and usage metering.
//!
//! Grounded on the teacher's `client_ext_http_basic.rs` / `client_ext_http_stream.rs`
//! request path, restructured per the design notes ("Middleware composition")
//! into an explicit ordered composition rather than nested nameless closures,
//! so reordering retry and the breaker is a one-line change.

#[ allow( clippy::missing_inline_in_public_items ) ]
mod private
{
  use crate::circuit_breaker::CircuitBreaker;
  use crate::error::RuntimeError;
  use crate::logging::RequestLogger;
  use crate::priority_queue::PriorityRequestQueue;
  use crate::rate_limiter::RateLimiter;
  use crate::retry::RetryEngine;
  use crate::types::{ ChatCompletionResponse, EmbeddingResponse, ProviderType, TextCompletionResponse, TokenUsage };
  use crate::usage::UsageTracker;
  use std::future::Future;
  use std::sync::Arc;
  use std::time::Instant;

  /// Ambient cooperative-cancellation handle threaded through every
  /// suspension point in the pipeline (rate-limiter waits, queue
  /// enqueue/dequeue, retry backoff sleeps, HTTP calls).
  #[ derive( Debug, Clone ) ]
  pub struct CancellationContext
  {
    token : tokio_util::sync::CancellationToken,
  }

  impl CancellationContext
  {
    /// Construct a fresh, not-yet-cancelled context.
    #[ must_use ]
    #[ inline ]
    pub fn new() -> Self
    {
      Self { token : tokio_util::sync::CancellationToken::new() }
    }

    /// Derive a child context that is cancelled whenever `self` is, in
    /// addition to its own independent cancellation.
    #[ must_use ]
    #[ inline ]
    pub fn child( &self ) -> Self
    {
      Self { token : self.token.child_token() }
    }

    /// Request cancellation.
    #[ inline ]
    pub fn cancel( &self )
    {
      self.token.cancel();
    }

    /// Whether this context (or an ancestor) has been cancelled.
    #[ must_use ]
    #[ inline ]
    pub fn is_cancelled( &self ) -> bool
    {
      self.token.is_cancelled()
    }

    /// Resolves once this context is cancelled; pending forever otherwise.
    #[ inline ]
    pub async fn cancelled( &self )
    {
      self.token.clone().cancelled_owned().await;
    }
  }

  impl Default for CancellationContext
  {
    #[ inline ]
    fn default() -> Self
    {
      Self::new()
    }
  }

  /// A capability call, driving both the operation's queue priority and its
  /// log/usage bookkeeping.
  #[ derive( Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize ) ]
  #[ serde( rename_all = "kebab-case" ) ]
  pub enum Operation
  {
    /// Streaming chat completion.
    StreamingChatCompletion,
    /// Non-streaming chat completion.
    ChatCompletion,
    /// Legacy text completion.
    TextCompletion,
    /// Embedding generation.
    Embedding,
    /// Local token counting.
    CountTokens,
    /// Model list retrieval.
    ListModels,
    /// Single model metadata lookup.
    ModelInfo,
    /// Capability / model-support probe.
    CapabilityProbe,
  }

  impl Operation
  {
    /// Queue priority for this operation : streaming is highest (0),
    /// everyday completions default to 1, and listing/probing operations
    /// are lowest (2).
    #[ must_use ]
    #[ inline ]
    pub fn priority( self ) -> u8
    {
      match self
      {
        Self::StreamingChatCompletion => 0,
        Self::ChatCompletion | Self::TextCompletion | Self::Embedding | Self::CountTokens => 1,
        Self::ListModels | Self::ModelInfo | Self::CapabilityProbe => 2,
      }
    }

    /// Stable short name used in log records.
    #[ must_use ]
    #[ inline ]
    pub fn name( self ) -> &'static str
    {
      match self
      {
        Self::StreamingChatCompletion => "streaming_chat_completion",
        Self::ChatCompletion => "chat_completion",
        Self::TextCompletion => "text_completion",
        Self::Embedding => "create_embedding",
        Self::CountTokens => "count_tokens",
        Self::ListModels => "list_models",
        Self::ModelInfo => "model_info",
        Self::CapabilityProbe => "capability_probe",
      }
    }
  }

  /// Implemented by every response type that flows through
  /// [`ResiliencePipeline::execute_with_resilience`] so the pipeline can
  /// record token usage without knowing the concrete response shape.
  pub trait TokenCounted
  {
    /// Total tokens this response accounts for, for usage tracking.
    fn token_count( &self ) -> u32;
  }

  impl TokenCounted for TokenUsage
  {
    #[ inline ]
    fn token_count( &self ) -> u32 { self.total_tokens }
  }

  impl TokenCounted for TextCompletionResponse
  {
    #[ inline ]
    fn token_count( &self ) -> u32 { self.usage.total_tokens }
  }

  impl TokenCounted for ChatCompletionResponse
  {
    #[ inline ]
    fn token_count( &self ) -> u32 { self.usage.total_tokens }
  }

  impl TokenCounted for EmbeddingResponse
  {
    #[ inline ]
    fn token_count( &self ) -> u32 { self.usage.total_tokens }
  }

  /// The resilience stack a single provider's requests traverse : priority
  /// queue, retry engine, circuit breaker, and rate limiter, plus the
  /// logging and usage-metering wrappers around them.
  #[ derive( Debug ) ]
  pub struct ResiliencePipeline
  {
    provider_type : ProviderType,
    queue : Arc< PriorityRequestQueue >,
    retry : Arc< RetryEngine >,
    breaker : Arc< CircuitBreaker >,
    rate_limiter : Arc< RateLimiter >,
    logger : Arc< RequestLogger >,
    usage : Arc< UsageTracker >,
  }

  impl ResiliencePipeline
  {
    /// Assemble a pipeline from its already-constructed layers.
    #[ must_use ]
    #[ inline ]
    #[ allow( clippy::too_many_arguments ) ]
    pub fn new(
      provider_type : ProviderType,
      queue : Arc< PriorityRequestQueue >,
      retry : Arc< RetryEngine >,
      breaker : Arc< CircuitBreaker >,
      rate_limiter : Arc< RateLimiter >,
      logger : Arc< RequestLogger >,
      usage : Arc< UsageTracker >,
    ) -> Self
    {
      Self { provider_type, queue, retry, breaker, rate_limiter, logger, usage }
    }

    /// Drive `fn_` through the fixed composition described in the module
    /// docs, logging the request/response and recording usage metrics.
    /// `fn_` is invoked possibly more than once (retry) and must perform
    /// wire encode, HTTP I/O, and wire decode for one attempt.
    ///
    /// # Errors
    ///
    /// Surfaces the first terminal error from any layer : queue rejection
    /// or timeout, retry exhaustion, circuit-open, or cancellation.
    pub async fn execute_with_resilience< T, F, Fut >(
      &self,
      ctx : &CancellationContext,
      operation : Operation,
      model_id : &str,
      fn_ : F,
    ) -> Result< T, RuntimeError >
    where
      F : Fn( CancellationContext ) -> Fut + Send + Sync + 'static,
      Fut : Future< Output = Result< T, RuntimeError > > + Send + 'static,
      T : TokenCounted + Send + 'static,
    {
      let request_id = self.logger.log_request( &self.provider_type, operation.name(), "" );
      let started_at = Instant::now();

      let retry = self.retry.clone();
      let breaker = self.breaker.clone();
      let rate_limiter = self.rate_limiter.clone();
      let fn_ = Arc::new( fn_ );
      let priority = operation.priority();
      let job_ctx = ctx.clone();

      let result = self.queue.execute( ctx, priority, move ||
      {
        let retry = retry.clone();
        let breaker = breaker.clone();
        let rate_limiter = rate_limiter.clone();
        let fn_ = fn_.clone();
        let ctx = job_ctx.clone();
        async move
        {
          let retry_ctx = ctx.clone();
          retry.execute( &retry_ctx, move ||
          {
            let breaker = breaker.clone();
            let rate_limiter = rate_limiter.clone();
            let fn_ = fn_.clone();
            let ctx = ctx.clone();
            async move
            {
              breaker.execute( move ||
              {
                let rate_limiter = rate_limiter.clone();
                let fn_ = fn_.clone();
                let ctx = ctx.clone();
                async move
                {
                  let permit = rate_limiter.wait( &ctx ).await?;
                  let outcome = fn_( ctx.clone() ).await;
                  rate_limiter.release( permit );
                  outcome
                }
              } ).await
            }
          } ).await
        }
      } ).await;

      let elapsed = started_at.elapsed();
      let token_count = result.as_ref().ok().map( TokenCounted::token_count ).unwrap_or_default();
      self.logger.log_response( &request_id, result.is_ok(), elapsed, result.as_ref().err() );
      self.usage.add_request( model_id, token_count, elapsed, result.is_err() );
      result
    }
  }

} // end mod private

crate::mod_interface!
{
  exposed use
  {
    CancellationContext,
    Operation,
    ResiliencePipeline,
    TokenCounted,
  };
}

#[ cfg( test ) ]
mod tests
{
  use super::private::{ CancellationContext, Operation, ResiliencePipeline };
  use crate::circuit_breaker::{ CircuitBreaker, CircuitBreakerConfig };
  use crate::error::{ ProviderErrorDetail, RuntimeError };
  use crate::logging::RequestLogger;
  use crate::priority_queue::{ PriorityQueueConfig, PriorityRequestQueue };
  use crate::rate_limiter::{ RateLimitConfig, RateLimiter };
  use crate::retry::{ RetryConfig, RetryEngine };
  use crate::types::{ ProviderType, TokenUsage };
  use crate::usage::UsageTracker;
  use std::sync::atomic::{ AtomicU32, Ordering };
  use std::sync::Arc;
  use std::time::Duration;

  #[ test ]
  fn streaming_operation_has_highest_priority()
  {
    assert_eq!( Operation::StreamingChatCompletion.priority(), 0 );
  }

  #[ test ]
  fn listing_operations_have_lowest_priority()
  {
    assert_eq!( Operation::ListModels.priority(), 2 );
    assert_eq!( Operation::ModelInfo.priority(), 2 );
  }

  #[ test ]
  fn default_completion_priority_is_one()
  {
    assert_eq!( Operation::ChatCompletion.priority(), 1 );
  }

  fn pipeline() -> ( ResiliencePipeline, Arc< UsageTracker > )
  {
    let usage = Arc::new( UsageTracker::default() );
    let pipeline = ResiliencePipeline::new(
      ProviderType::new( "openai" ),
      Arc::new( PriorityRequestQueue::new( PriorityQueueConfig::default() ) ),
      Arc::new( RetryEngine::new( RetryConfig { max_retries : 2, initial_backoff : Duration::from_millis( 1 ), max_backoff : Duration::from_millis( 2 ), ..RetryConfig::default() } ) ),
      Arc::new( CircuitBreaker::new( CircuitBreakerConfig::default() ) ),
      Arc::new( RateLimiter::new( RateLimitConfig { requests_per_minute : 6000, burst : 100, max_concurrent_requests : 10, ..RateLimitConfig::default() } ) ),
      Arc::new( RequestLogger::default() ),
      usage.clone(),
    );
    ( pipeline, usage )
  }

  #[ tokio::test( start_paused = true ) ]
  async fn successful_call_flows_through_every_layer_and_records_usage()
  {
    let ( pipeline, usage ) = pipeline();
    let ctx = CancellationContext::new();
    let result = pipeline.execute_with_resilience( &ctx, Operation::ChatCompletion, "gpt-4", move | _ctx |
    {
      async move { Ok::< _, RuntimeError >( TokenUsage::new( 5, 7 ) ) }
    } ).await;
    assert_eq!( result.unwrap().total_tokens, 12 );
    let metrics = usage.metrics( "gpt-4" ).unwrap();
    assert_eq!( metrics.request_count, 1 );
    assert_eq!( metrics.token_count, 12 );
    assert_eq!( metrics.error_count, 0 );
  }

  #[ tokio::test( start_paused = true ) ]
  async fn transient_failures_are_retried_then_succeed()
  {
    let ( pipeline, usage ) = pipeline();
    let ctx = CancellationContext::new();
    let attempts = Arc::new( AtomicU32::new( 0 ) );
    let attempts_clone = attempts.clone();
    let result = pipeline.execute_with_resilience( &ctx, Operation::ChatCompletion, "gpt-4", move | _ctx |
    {
      let attempts = attempts_clone.clone();
      async move
      {
        if attempts.fetch_add( 1, Ordering::SeqCst ) < 2
        {
          Err( RuntimeError::Provider( ProviderErrorDetail { status_code : 503, error_type : None, code : None, message : "unavailable".into(), raw_body : String::new() } ) )
        }
        else
        {
          Ok( TokenUsage::new( 1, 1 ) )
        }
      }
    } ).await;
    assert!( result.is_ok() );
    assert_eq!( attempts.load( Ordering::SeqCst ), 3 );
    assert_eq!( usage.metrics( "gpt-4" ).unwrap().error_count, 0 );
  }

  #[ tokio::test( start_paused = true ) ]
  async fn non_retryable_failure_is_recorded_as_an_error_on_first_attempt()
  {
    let ( pipeline, usage ) = pipeline();
    let ctx = CancellationContext::new();
    let calls = Arc::new( AtomicU32::new( 0 ) );
    let calls_clone = calls.clone();
    let result = pipeline.execute_with_resilience( &ctx, Operation::ChatCompletion, "gpt-4", move | _ctx |
    {
      calls_clone.fetch_add( 1, Ordering::SeqCst );
      async move { Err::< TokenUsage, _ >( RuntimeError::InvalidConfig( "bad model".into() ) ) }
    } ).await;
    assert!( matches!( result, Err( RuntimeError::InvalidConfig( _ ) ) ) );
    assert_eq!( calls.load( Ordering::SeqCst ), 1 );
    assert_eq!( usage.metrics( "gpt-4" ).unwrap().error_count, 1 );
  }
}
