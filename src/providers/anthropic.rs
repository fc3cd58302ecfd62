//! Anthropic-family `Provider` : chat completion over the Messages API, with
//! streaming via typed Server-Sent-Events (`message_start`,
//! `content_block_delta`, `message_delta`, `message_stop`).
//!
//! Grounded on the teacher's `api/claude` crate : `x-api-key` /
//! `anthropic-version` headers and the `system` prompt carried outside the
//! message list (`content_generation.rs`), the default base URL
//! `https://api.anthropic.com` (`environment.rs`), and the event shapes in
//! `src/streaming/types.rs` (`StreamEvent`, `StreamDelta::TextDelta`). No
//! legacy text-completion or embedding endpoint exists on this API, so
//! those two capabilities return [`crate::error::RuntimeError::NotImplemented`]
//! per spec §4.1's documented fallback.

#[ allow( clippy::missing_inline_in_public_items ) ]
mod private
{
  use crate::config::ProviderConfig;
  use crate::error::{ ProviderErrorDetail, RuntimeError, RuntimeResult };
  use crate::pipeline::{ CancellationContext, Operation };
  use crate::provider::{ ChunkCallback, Provider, ProviderCore, not_implemented };
  use crate::types::
  {
    Capability, ChatChoice, ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse,
    ChatMessage, EmbeddingRequest, EmbeddingResponse, ModelCategory, ModelInfo, ProviderType,
    Role, TextCompletionRequest, TextCompletionResponse, TokenUsage,
  };
  use crate::rate_limiter::RateLimitConfig;
  use crate::retry::RetryConfig;
  use crate::usage::UsageMetrics;
  use eventsource_stream::Eventsource;
  use futures_util::StreamExt;
  use serde::{ Deserialize, Serialize };
  use std::collections::{ BTreeSet, HashMap };
  use std::sync::Arc;

  const DEFAULT_BASE_URL : &str = "https://api.anthropic.com";
  const ANTHROPIC_VERSION : &str = "2023-06-01";
  const DEFAULT_MAX_TOKENS : u32 = 4096;

  fn base_url( config : &ProviderConfig ) -> String
  {
    if config.base_url.is_empty() { DEFAULT_BASE_URL.to_string() } else { config.base_url.trim_end_matches( '/' ).to_string() }
  }

  /// Apply every header from a provider's `additional_headers` onto a
  /// request builder.
  fn apply_additional_headers( mut builder : reqwest::RequestBuilder, headers : &HashMap< String, String > ) -> reqwest::RequestBuilder
  {
    for ( key, value ) in headers
    {
      builder = builder.header( key, value );
    }
    builder
  }

  /// Serialize `wire` and merge a provider's `additional_params` into the
  /// resulting JSON object, with configured params taking precedence over
  /// the wire shape's own fields.
  fn merge_additional_params< T : Serialize >( wire : &T, params : &HashMap< String, serde_json::Value > ) -> RuntimeResult< serde_json::Value >
  {
    let mut value = serde_json::to_value( wire )?;
    if let serde_json::Value::Object( map ) = &mut value
    {
      for ( key, param ) in params
      {
        map.insert( key.clone(), param.clone() );
      }
    }
    Ok( value )
  }

  fn role_str( role : Role ) -> &'static str
  {
    match role
    {
      Role::User | Role::Tool => "user",
      Role::Assistant => "assistant",
      Role::System => "user",
    }
  }

  #[ derive( Debug, Serialize ) ]
  struct WireMessage< 'a >
  {
    role : &'a str,
    content : &'a str,
  }

  #[ derive( Debug, Serialize ) ]
  struct MessagesRequestWire< 'a >
  {
    model : &'a str,
    max_tokens : u32,
    messages : Vec< WireMessage< 'a > >,
    #[ serde( skip_serializing_if = "Option::is_none" ) ]
    system : Option< &'a str >,
    #[ serde( skip_serializing_if = "Option::is_none" ) ]
    temperature : Option< f32 >,
    #[ serde( skip_serializing_if = "Option::is_none" ) ]
    top_p : Option< f32 >,
    #[ serde( skip_serializing_if = "Vec::is_empty" ) ]
    stop_sequences : Vec< String >,
    stream : bool,
  }

  #[ derive( Debug, Deserialize ) ]
  struct WireUsage
  {
    #[ serde( default ) ]
    input_tokens : u32,
    #[ serde( default ) ]
    output_tokens : u32,
  }

  impl From< WireUsage > for TokenUsage
  {
    fn from( wire : WireUsage ) -> Self
    {
      Self::new( wire.input_tokens, wire.output_tokens )
    }
  }

  /// Fold one `usage` payload (from `message_start` or `message_delta`) into
  /// the running prompt/completion pair. `message_delta`'s usage is
  /// output-only, so a zero `input_tokens` leaves the prompt count from
  /// `message_start` untouched; `output_tokens` is always the upstream's
  /// running total, so it always replaces.
  fn accumulate_usage( prompt_tokens : &mut u32, completion_tokens : &mut u32, usage : &WireUsage )
  {
    if usage.input_tokens > 0
    {
      *prompt_tokens = usage.input_tokens;
    }
    *completion_tokens = usage.output_tokens;
  }

  #[ derive( Debug, Deserialize ) ]
  #[ serde( tag = "type", rename_all = "snake_case" ) ]
  enum ContentBlockWire
  {
    Text { text : String },
    #[ serde( other ) ]
    Other,
  }

  #[ derive( Debug, Deserialize ) ]
  struct MessagesResponseWire
  {
    model : String,
    content : Vec< ContentBlockWire >,
    stop_reason : Option< String >,
    usage : WireUsage,
  }

  #[ derive( Debug, Deserialize ) ]
  struct StreamMessageWire
  {
    model : String,
    usage : WireUsage,
  }

  #[ derive( Debug, Deserialize ) ]
  #[ serde( tag = "type", rename_all = "snake_case" ) ]
  enum StreamDeltaWire
  {
    TextDelta { text : String },
    #[ serde( other ) ]
    Other,
  }

  #[ derive( Debug, Deserialize ) ]
  struct ContentBlockDeltaEvent
  {
    delta : StreamDeltaWire,
  }

  #[ derive( Debug, Deserialize ) ]
  struct MessageDeltaPayload
  {
    stop_reason : Option< String >,
  }

  #[ derive( Debug, Deserialize ) ]
  struct MessageDeltaEvent
  {
    delta : MessageDeltaPayload,
    usage : Option< WireUsage >,
  }

  #[ derive( Debug, Deserialize ) ]
  struct ModelListDatum
  {
    id : String,
  }

  #[ derive( Debug, Deserialize ) ]
  struct ModelListWire
  {
    data : Vec< ModelListDatum >,
  }

  #[ derive( Debug, Deserialize ) ]
  struct ApiErrorBody
  {
    error : ApiErrorPayload,
  }

  #[ derive( Debug, Deserialize ) ]
  struct ApiErrorPayload
  {
    message : String,
    #[ serde( rename = "type" ) ]
    kind : Option< String >,
  }

  async fn classify_error_response( response : reqwest::Response ) -> RuntimeError
  {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    let ( message, error_type ) = serde_json::from_str::< ApiErrorBody >( &body )
      .map_or_else( | _ | ( body.clone(), None ), | parsed | ( parsed.error.message, parsed.error.kind ) );
    RuntimeError::Provider( ProviderErrorDetail { status_code : status, error_type, code : None, message, raw_body : body } )
  }

  /// Split a chat transcript into an optional leading system prompt (the
  /// concatenation of any `Role::System` messages) and the remaining
  /// conversational turns, per the Messages API's separate `system` field.
  fn split_system_prompt( messages : &[ ChatMessage ] ) -> ( Option< String >, Vec< &ChatMessage > )
  {
    let mut system = Vec::new();
    let mut rest = Vec::new();
    for message in messages
    {
      if message.role == Role::System
      {
        system.push( message.content.as_str() );
      }
      else
      {
        rest.push( message );
      }
    }
    ( if system.is_empty() { None } else { Some( system.join( "\n" ) ) }, rest )
  }

  /// Thin `Provider` implementation over the Anthropic Messages API.
  #[ derive( Debug ) ]
  pub struct AnthropicProvider
  {
    core : Arc< ProviderCore >,
  }

  impl AnthropicProvider
  {
    /// Construct a provider from validated configuration.
    ///
    /// # Errors
    ///
    /// Propagates [`ProviderCore::new`]'s error.
    pub fn new( config : ProviderConfig, logger : Arc< crate::logging::RequestLogger > ) -> RuntimeResult< Self >
    {
      Ok( Self { core : Arc::new( ProviderCore::new( config, logger )? ) } )
    }

    fn headers( &self, builder : reqwest::RequestBuilder ) -> reqwest::RequestBuilder
    {
      let config = self.core.config();
      let builder = builder
        .header( "x-api-key", config.api_key )
        .header( "anthropic-version", ANTHROPIC_VERSION );
      apply_additional_headers( builder, &config.additional_headers )
    }

    fn max_tokens_for( &self, sampling_max_tokens : Option< u32 > ) -> u32
    {
      sampling_max_tokens.unwrap_or( DEFAULT_MAX_TOKENS )
    }

    async fn fetch_models( &self ) -> RuntimeResult< Vec< ModelInfo > >
    {
      let url = format!( "{}/v1/models", base_url( &self.core.config() ) );
      let response = self.headers( self.core.http_client().get( &url ) ).send().await?;
      if !response.status().is_success()
      {
        return Err( classify_error_response( response ).await );
      }
      let wire : ModelListWire = response.json().await?;
      Ok
      (
        wire.data.into_iter().map( | datum |
        {
          ModelInfo
          {
            id : datum.id,
            provider : ProviderType::new( "anthropic" ),
            category : ModelCategory::Chat,
            capabilities : BTreeSet::from( [ Capability::ChatCompletion, Capability::Streaming, Capability::ToolUse ] ),
            max_tokens : 200_000,
            training_cutoff : None,
            pricing : None,
          }
        } ).collect()
      )
    }
  }

  #[ async_trait::async_trait ]
  impl Provider for AnthropicProvider
  {
    fn r#type( &self ) -> ProviderType { ProviderType::new( "anthropic" ) }
    fn config( &self ) -> ProviderConfig { self.core.config() }

    async fn list_models( &self ) -> RuntimeResult< Vec< ModelInfo > >
    {
      let core = self.core.clone();
      let provider = Self { core : core.clone() };
      core.list_models_cached( move || async move { provider.fetch_models().await } ).await
    }

    fn model_info( &self, id : &str ) -> Option< ModelInfo > { self.core.model_info( id ) }

    async fn text_completion( &self, _ctx : &CancellationContext, _request : TextCompletionRequest ) -> RuntimeResult< TextCompletionResponse >
    {
      Err( not_implemented( &self.r#type(), "text_completion" ) )
    }

    async fn chat_completion( &self, ctx : &CancellationContext, request : ChatCompletionRequest ) -> RuntimeResult< ChatCompletionResponse >
    {
      let config = self.core.config();
      let model = if request.model.is_empty() { config.default_model.clone() } else { request.model.clone() };
      let url = format!( "{}/v1/messages", base_url( &config ) );
      let max_tokens = self.max_tokens_for( request.sampling.max_tokens );
      let api_key = config.api_key.clone();
      let http_client = self.core.http_client().clone();
      let additional_headers = config.additional_headers.clone();
      let additional_params = config.additional_params.clone();

      self.core.pipeline().execute_with_resilience( ctx, Operation::ChatCompletion, &model, move | _ctx |
      {
        let url = url.clone();
        let api_key = api_key.clone();
        let http_client = http_client.clone();
        let model = model.clone();
        let messages = request.messages.clone();
        let sampling = request.sampling.clone();
        let additional_headers = additional_headers.clone();
        let additional_params = additional_params.clone();
        async move
        {
          let ( system, turns ) = split_system_prompt( &messages );
          let wire = MessagesRequestWire
          {
            model : &model,
            max_tokens,
            messages : turns.iter().map( | message | WireMessage { role : role_str( message.role ), content : &message.content } ).collect(),
            system : system.as_deref(),
            temperature : sampling.temperature,
            top_p : sampling.top_p,
            stop_sequences : sampling.stop,
            stream : false,
          };
          let body = merge_additional_params( &wire, &additional_params )?;
          let builder = http_client.post( &url )
            .header( "x-api-key", &api_key )
            .header( "anthropic-version", ANTHROPIC_VERSION )
            .json( &body );
          let response = apply_additional_headers( builder, &additional_headers ).send().await?;
          if !response.status().is_success()
          {
            return Err( classify_error_response( response ).await );
          }
          let wire : MessagesResponseWire = response.json().await?;
          let text = wire.content.into_iter().filter_map( | block | match block { ContentBlockWire::Text { text } => Some( text ), ContentBlockWire::Other => None } ).collect::< Vec< _ > >().join( "" );
          Ok( ChatCompletionResponse
          {
            model : wire.model,
            choices : vec!
            [
              ChatChoice
              {
                message : ChatMessage::new( Role::Assistant, text ),
                index : 0,
                finish_reason : wire.stop_reason,
              }
            ],
            usage : wire.usage.into(),
          } )
        }
      } ).await
    }

    async fn streaming_chat_completion( &self, ctx : &CancellationContext, request : ChatCompletionRequest, on_chunk : ChunkCallback< '_ > ) -> RuntimeResult< () >
    {
      if ctx.is_cancelled()
      {
        return Err( RuntimeError::Cancelled );
      }

      let config = self.core.config();
      let model = if request.model.is_empty() { config.default_model.clone() } else { request.model };
      let url = format!( "{}/v1/messages", base_url( &config ) );
      let max_tokens = self.max_tokens_for( request.sampling.max_tokens );
      let ( system, turns ) = split_system_prompt( &request.messages );
      let wire = MessagesRequestWire
      {
        model : &model,
        max_tokens,
        messages : turns.iter().map( | message | WireMessage { role : role_str( message.role ), content : &message.content } ).collect(),
        system : system.as_deref(),
        temperature : request.sampling.temperature,
        top_p : request.sampling.top_p,
        stop_sequences : request.sampling.stop,
        stream : true,
      };

      let body = merge_additional_params( &wire, &config.additional_params )?;
      let response = self.headers( self.core.http_client().post( &url ) ).json( &body ).send().await?;
      if !response.status().is_success()
      {
        return Err( classify_error_response( response ).await );
      }

      let mut event_stream = response.bytes_stream().eventsource();
      let mut prompt_tokens = 0u32;
      let mut completion_tokens = 0u32;
      let mut usage_seen = false;
      let mut finish_reason = None;

      while let Some( event ) = event_stream.next().await
      {
        if ctx.is_cancelled()
        {
          return Err( RuntimeError::Cancelled );
        }

        let event = event.map_err( | error | RuntimeError::Transport( format!( "SSE stream error : {error}" ) ) )?;
        match event.event.as_str()
        {
          "message_start" =>
          {
            if let Ok( started ) = serde_json::from_str::< StreamMessageWire >( &event.data )
            {
              accumulate_usage( &mut prompt_tokens, &mut completion_tokens, &started.usage );
              usage_seen = true;
            }
          }
          "content_block_delta" =>
          {
            let parsed : ContentBlockDeltaEvent = serde_json::from_str( &event.data )?;
            if let StreamDeltaWire::TextDelta { text } = parsed.delta
            {
              on_chunk( ChatCompletionChunk { delta : text, is_final : false, finish_reason : None, usage : None } );
            }
          }
          "message_delta" =>
          {
            let parsed : MessageDeltaEvent = serde_json::from_str( &event.data )?;
            finish_reason = parsed.delta.stop_reason;
            if let Some( usage ) = parsed.usage
            {
              accumulate_usage( &mut prompt_tokens, &mut completion_tokens, &usage );
              usage_seen = true;
            }
          }
          "message_stop" => break,
          _ => {}
        }
      }

      let aggregated_usage = usage_seen.then( || TokenUsage::new( prompt_tokens, completion_tokens ) );
      on_chunk( ChatCompletionChunk { delta : String::new(), is_final : true, finish_reason, usage : aggregated_usage } );
      Ok( () )
    }

    async fn create_embedding( &self, _ctx : &CancellationContext, _request : EmbeddingRequest ) -> RuntimeResult< EmbeddingResponse >
    {
      Err( not_implemented( &self.r#type(), "create_embedding" ) )
    }

    async fn count_tokens( &self, text : &str, _model_id : &str ) -> RuntimeResult< u32 >
    {
      let char_count = u32::try_from( text.len() ).unwrap_or( u32::MAX );
      #[ allow( clippy::cast_possible_truncation, clippy::cast_sign_loss ) ]
      let tokens = ( f64::from( char_count ) / 4.0 ).ceil() as u32;
      Ok( tokens )
    }

    fn supports_model( &self, id : &str ) -> bool { self.core.supports_model( id ) }
    fn supports_capability( &self, capability : Capability ) -> bool { self.core.supports_capability( capability ) }

    async fn close( &self ) -> RuntimeResult< () > { self.core.close().await; Ok( () ) }

    fn rate_limit_config( &self ) -> RateLimitConfig { self.core.rate_limit_config() }
    fn update_rate_limit_config( &self, config : RateLimitConfig ) { self.core.update_rate_limit_config( config ); }
    fn retry_config( &self ) -> RetryConfig { self.core.retry_config() }
    fn update_retry_config( &self, config : RetryConfig ) { self.core.update_retry_config( config ); }
    fn usage_metrics( &self, model_id : &str ) -> Option< UsageMetrics > { self.core.usage_metrics( model_id ) }
  }

  #[ cfg( test ) ]
  mod tests
  {
    use super::*;

    #[ test ]
    fn base_url_falls_back_to_default_when_unset()
    {
      let config = ProviderConfig::new( ProviderType::new( "anthropic" ), "sk-ant-test" );
      assert_eq!( base_url( &config ), DEFAULT_BASE_URL );
    }

    #[ test ]
    fn split_system_prompt_separates_system_messages()
    {
      let messages = vec!
      [
        ChatMessage::new( Role::System, "be terse" ),
        ChatMessage::new( Role::User, "hello" ),
      ];
      let ( system, turns ) = split_system_prompt( &messages );
      assert_eq!( system.as_deref(), Some( "be terse" ) );
      assert_eq!( turns.len(), 1 );
      assert_eq!( turns[ 0 ].role, Role::User );
    }

    #[ test ]
    fn split_system_prompt_is_none_when_absent()
    {
      let messages = vec![ ChatMessage::new( Role::User, "hello" ) ];
      let ( system, turns ) = split_system_prompt( &messages );
      assert!( system.is_none() );
      assert_eq!( turns.len(), 1 );
    }

    #[ test ]
    fn wire_usage_missing_fields_default_to_zero()
    {
      let usage : WireUsage = serde_json::from_str( r#"{"output_tokens":2}"# ).unwrap();
      assert_eq!( usage.input_tokens, 0 );
      assert_eq!( usage.output_tokens, 2 );
    }

    /// `message_start` carries the prompt count; the output-only
    /// `message_delta` usage must add completion tokens without discarding it.
    #[ test ]
    fn streaming_usage_merges_prompt_from_start_with_completion_from_delta()
    {
      let mut prompt_tokens = 0u32;
      let mut completion_tokens = 0u32;

      let start : WireUsage = serde_json::from_str( r#"{"input_tokens":17,"output_tokens":0}"# ).unwrap();
      accumulate_usage( &mut prompt_tokens, &mut completion_tokens, &start );
      // two content_block_delta events carry no usage.

      let delta : WireUsage = serde_json::from_str( r#"{"output_tokens":2}"# ).unwrap();
      accumulate_usage( &mut prompt_tokens, &mut completion_tokens, &delta );

      let usage = TokenUsage::new( prompt_tokens, completion_tokens );
      assert_eq!( usage.prompt_tokens, 17 );
      assert_eq!( usage.completion_tokens, 2 );
      assert_eq!( usage.total_tokens, 19 );
    }

    #[ test ]
    fn message_delta_event_parses_with_partial_usage()
    {
      let parsed : MessageDeltaEvent = serde_json::from_str( r#"{"delta":{"stop_reason":"end_turn"},"usage":{"output_tokens":2}}"# ).unwrap();
      assert_eq!( parsed.delta.stop_reason.as_deref(), Some( "end_turn" ) );
      assert_eq!( parsed.usage.unwrap().output_tokens, 2 );
    }

    #[ test ]
    fn merge_additional_params_overlays_configured_keys()
    {
      let wire = MessagesRequestWire
      {
        model : "claude-3-opus",
        max_tokens : 1024,
        messages : Vec::new(),
        system : None,
        temperature : None,
        top_p : None,
        stop_sequences : Vec::new(),
        stream : false,
      };
      let mut params = HashMap::new();
      params.insert( "metadata".to_string(), serde_json::json!( { "user_id" : "u-1" } ) );
      let merged = merge_additional_params( &wire, &params ).unwrap();
      assert_eq!( merged[ "model" ], serde_json::json!( "claude-3-opus" ) );
      assert_eq!( merged[ "metadata" ][ "user_id" ], serde_json::json!( "u-1" ) );
    }

    #[ test ]
    fn text_completion_is_not_implemented()
    {
      let provider = AnthropicProvider::new( ProviderConfig::new( ProviderType::new( "anthropic" ), "sk-ant-test" ), Arc::new( crate::logging::RequestLogger::default() ) ).unwrap();
      let ctx = CancellationContext::new();
      let request = TextCompletionRequest { model : String::new(), prompt : String::new(), sampling : crate::types::SamplingParams::default() };
      let result = tokio_test::block_on( provider.text_completion( &ctx, request ) );
      assert!( matches!( result, Err( RuntimeError::NotImplemented { .. } ) ) );
    }
  }

} // end mod private

crate::mod_interface!
{
  exposed use
  {
    AnthropicProvider,
  };
}
