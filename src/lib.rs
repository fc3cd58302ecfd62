//! Multi-provider LLM client runtime.
//!
//! This crate is the shared resilience and concurrency pipeline that every
//! outbound request to an upstream LLM HTTP API traverses, plus the
//! registries and persistent job queue that coordinate work across
//! providers. It does not interpret LLM output semantically, does not
//! persist request/response bodies, and does not implement any LLM itself.
//!
//! # Pipeline
//!
//! ```text
//! caller
//!   -> cache lookup (if wrapped)
//!   -> pipeline(request, operation):
//!       log request -> enqueue on priority queue
//!         -> retry loop:
//!             -> circuit-breaker gate
//!               -> rate-limiter gate (req tokens + concurrency slot)
//!                 -> wire encode -> HTTP via pooled connection
//!                 <- wire decode or error classification
//!             <- record success/failure to breaker
//!         <- retry or surface
//!       -> log response, update usage metrics
//!   -> cache store on success
//! ```
//!
//! # Examples
//!
//! ```no_run
//! use llm_runtime::{ EnvConfigSource, ProviderFactory, ProviderType };
//! use std::sync::Arc;
//!
//! # async fn example() -> error_tools::untyped::Result< () > {
//! let factory = ProviderFactory::new( Arc::new( EnvConfigSource::new() ) );
//! let provider = factory.get_provider( &ProviderType::new( "openai" ) )?;
//! let models = provider.list_models().await?;
//! println!( "{} models available", models.len() );
//! # Ok( () )
//! # }
//! ```

#[ cfg( feature = "enabled" ) ]
use mod_interface::mod_interface;

mod private {}

#[ cfg( feature = "enabled" ) ]
crate::mod_interface!
{
  layer error;
  layer types;
  layer secret;
  layer config;
  layer rate_limiter;
  layer circuit_breaker;
  layer retry;
  layer connection_pool;
  layer priority_queue;
  layer cache;
  layer logging;
  layer usage;
  layer provider;
  layer pipeline;
  layer registry;
  #[ cfg( feature = "job-queue" ) ]
  layer job_queue;
  layer providers;
}
