//! OpenAI-family `Provider` : chat/text completions, embeddings, and model
//! listing over plain JSON, streaming chat via `data:`-prefixed
//! Server-Sent-Events terminated by a literal `[DONE]` line.
//!
//! Grounded on the teacher's `api/openai` crate : request/response field
//! names from `components::chat_shared` / `components::embeddings_request`
//! / `components::embeddings`, the default base URL from
//! `environment::OpenaiEnvironmentImpl` (`https://api.openai.com/v1/`), and
//! the SSE loop from `client_ext_http_stream.rs`'s `post_stream`
//! (`eventsource_stream::Eventsource` over `response.bytes_stream()`,
//! `data == "[DONE]"` as the terminator).

#[ allow( clippy::missing_inline_in_public_items ) ]
mod private
{
  use crate::config::ProviderConfig;
  use crate::error::{ ProviderErrorDetail, RuntimeError, RuntimeResult };
  use crate::pipeline::{ CancellationContext, Operation };
  use crate::provider::{ ChunkCallback, Provider, ProviderCore };
  use crate::types::
  {
    Capability, ChatChoice, ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse,
    ChatMessage, Choice, EmbeddingInput, EmbeddingRequest, EmbeddingResponse, ModelCategory,
    ModelInfo, ProviderType, Role, TextCompletionRequest, TextCompletionResponse, TokenUsage,
  };
  use crate::rate_limiter::RateLimitConfig;
  use crate::retry::RetryConfig;
  use crate::usage::UsageMetrics;
  use eventsource_stream::Eventsource;
  use futures_util::StreamExt;
  use serde::{ Deserialize, Serialize };
  use std::collections::{ BTreeSet, HashMap };
  use std::sync::Arc;

  const DEFAULT_BASE_URL : &str = "https://api.openai.com/v1";

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

  #[ derive( Debug, Serialize ) ]
  struct WireMessage< 'a >
  {
    role : &'a str,
    content : &'a str,
  }

  fn role_str( role : Role ) -> &'static str
  {
    match role
    {
      Role::System => "system",
      Role::User => "user",
      Role::Assistant => "assistant",
      Role::Tool => "tool",
    }
  }

  #[ derive( Debug, Serialize ) ]
  struct ChatRequestWire< 'a >
  {
    model : &'a str,
    messages : Vec< WireMessage< 'a > >,
    #[ serde( skip_serializing_if = "Option::is_none" ) ]
    temperature : Option< f32 >,
    #[ serde( skip_serializing_if = "Option::is_none" ) ]
    top_p : Option< f32 >,
    #[ serde( skip_serializing_if = "Option::is_none" ) ]
    max_tokens : Option< u32 >,
    #[ serde( skip_serializing_if = "Vec::is_empty" ) ]
    stop : Vec< String >,
    stream : bool,
  }

  #[ derive( Debug, Deserialize ) ]
  struct WireUsage
  {
    prompt_tokens : u32,
    completion_tokens : u32,
    #[ allow( dead_code ) ]
    total_tokens : u32,
  }

  impl From< WireUsage > for TokenUsage
  {
    fn from( wire : WireUsage ) -> Self
    {
      Self::new( wire.prompt_tokens, wire.completion_tokens )
    }
  }

  #[ derive( Debug, Deserialize ) ]
  struct ChatResponseMessage
  {
    content : Option< String >,
  }

  #[ derive( Debug, Deserialize ) ]
  struct ChatResponseChoice
  {
    index : u32,
    message : ChatResponseMessage,
    finish_reason : Option< String >,
  }

  #[ derive( Debug, Deserialize ) ]
  struct ChatResponseWire
  {
    model : String,
    choices : Vec< ChatResponseChoice >,
    usage : WireUsage,
  }

  #[ derive( Debug, Deserialize ) ]
  struct ChatStreamDelta
  {
    content : Option< String >,
  }

  #[ derive( Debug, Deserialize ) ]
  struct ChatStreamChoice
  {
    delta : ChatStreamDelta,
    finish_reason : Option< String >,
  }

  #[ derive( Debug, Deserialize ) ]
  struct ChatStreamChunkWire
  {
    choices : Vec< ChatStreamChoice >,
    usage : Option< WireUsage >,
  }

  #[ derive( Debug, Serialize ) ]
  struct TextRequestWire< 'a >
  {
    model : &'a str,
    prompt : &'a str,
    #[ serde( skip_serializing_if = "Option::is_none" ) ]
    temperature : Option< f32 >,
    #[ serde( skip_serializing_if = "Option::is_none" ) ]
    top_p : Option< f32 >,
    #[ serde( skip_serializing_if = "Option::is_none" ) ]
    max_tokens : Option< u32 >,
    #[ serde( skip_serializing_if = "Vec::is_empty" ) ]
    stop : Vec< String >,
  }

  #[ derive( Debug, Deserialize ) ]
  struct TextResponseChoice
  {
    text : String,
    index : u32,
    finish_reason : Option< String >,
  }

  #[ derive( Debug, Deserialize ) ]
  struct TextResponseWire
  {
    model : String,
    choices : Vec< TextResponseChoice >,
    usage : WireUsage,
  }

  #[ derive( Debug, Serialize ) ]
  #[ serde( untagged ) ]
  enum EmbeddingInputWire< 'a >
  {
    One( &'a str ),
    Many( &'a [ String ] ),
  }

  #[ derive( Debug, Serialize ) ]
  struct EmbeddingRequestWire< 'a >
  {
    model : &'a str,
    input : EmbeddingInputWire< 'a >,
  }

  #[ derive( Debug, Deserialize ) ]
  struct EmbeddingDatum
  {
    embedding : Vec< f32 >,
    index : usize,
  }

  #[ derive( Debug, Deserialize ) ]
  struct EmbeddingResponseWire
  {
    model : String,
    data : Vec< EmbeddingDatum >,
    usage : WireUsage,
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
    code : Option< String >,
  }

  async fn classify_error_response( response : reqwest::Response ) -> RuntimeError
  {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    let ( message, error_type, code ) = serde_json::from_str::< ApiErrorBody >( &body )
      .map_or_else( | _ | ( body.clone(), None, None ), | parsed | ( parsed.error.message, parsed.error.kind, parsed.error.code ) );
    RuntimeError::Provider( ProviderErrorDetail { status_code : status, error_type, code, message, raw_body : body } )
  }

  /// Thin `Provider` implementation over the OpenAI chat/completions/embeddings
  /// wire protocol, driving every call through the composed
  /// [`ProviderCore`]'s resilience pipeline.
  #[ derive( Debug ) ]
  pub struct OpenAiProvider
  {
    core : Arc< ProviderCore >,
  }

  impl OpenAiProvider
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

    fn auth_header( &self ) -> String
    {
      format!( "Bearer {}", self.core.config().api_key )
    }

    async fn fetch_models( &self ) -> RuntimeResult< Vec< ModelInfo > >
    {
      let config = self.core.config();
      let url = format!( "{}/models", base_url( &config ) );
      let builder = self.core.http_client().get( &url ).bearer_auth( config.api_key );
      let response = apply_additional_headers( builder, &config.additional_headers ).send().await?;
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
            provider : ProviderType::new( "openai" ),
            category : ModelCategory::Chat,
            capabilities : BTreeSet::from( [ Capability::ChatCompletion, Capability::TextCompletion, Capability::Streaming, Capability::Embedding, Capability::FunctionCalling, Capability::JsonMode ] ),
            max_tokens : 8192,
            training_cutoff : None,
            pricing : None,
          }
        } ).collect()
      )
    }
  }

  #[ async_trait::async_trait ]
  impl Provider for OpenAiProvider
  {
    fn r#type( &self ) -> ProviderType { ProviderType::new( "openai" ) }
    fn config( &self ) -> ProviderConfig { self.core.config() }

    async fn list_models( &self ) -> RuntimeResult< Vec< ModelInfo > >
    {
      let core = self.core.clone();
      let provider = Self { core : core.clone() };
      core.list_models_cached( move || async move { provider.fetch_models().await } ).await
    }

    fn model_info( &self, id : &str ) -> Option< ModelInfo > { self.core.model_info( id ) }

    async fn text_completion( &self, ctx : &CancellationContext, request : TextCompletionRequest ) -> RuntimeResult< TextCompletionResponse >
    {
      let config = self.core.config();
      let model = if request.model.is_empty() { config.default_model.clone() } else { request.model.clone() };
      let url = format!( "{}/completions", base_url( &config ) );
      let http_client = self.core.http_client().clone();
      let auth = self.auth_header();
      let additional_headers = config.additional_headers.clone();
      let additional_params = config.additional_params.clone();

      self.core.pipeline().execute_with_resilience( ctx, Operation::TextCompletion, &model, move | _ctx |
      {
        let url = url.clone();
        let auth = auth.clone();
        let http_client = http_client.clone();
        let model = model.clone();
        let prompt = request.prompt.clone();
        let sampling = request.sampling.clone();
        let additional_headers = additional_headers.clone();
        let additional_params = additional_params.clone();
        async move
        {
          let wire = TextRequestWire
          {
            model : &model,
            prompt : &prompt,
            temperature : sampling.temperature,
            top_p : sampling.top_p,
            max_tokens : sampling.max_tokens,
            stop : sampling.stop,
          };
          let body = merge_additional_params( &wire, &additional_params )?;
          let builder = http_client.post( &url ).header( "Authorization", &auth ).json( &body );
          let response = apply_additional_headers( builder, &additional_headers ).send().await?;
          if !response.status().is_success()
          {
            return Err( classify_error_response( response ).await );
          }
          let wire : TextResponseWire = response.json().await?;
          Ok( TextCompletionResponse
          {
            model : wire.model,
            choices : wire.choices.into_iter().map( | choice | Choice { text : choice.text, index : choice.index, finish_reason : choice.finish_reason } ).collect(),
            usage : wire.usage.into(),
          } )
        }
      } ).await
    }

    async fn chat_completion( &self, ctx : &CancellationContext, request : ChatCompletionRequest ) -> RuntimeResult< ChatCompletionResponse >
    {
      let config = self.core.config();
      let model = if request.model.is_empty() { config.default_model.clone() } else { request.model.clone() };
      let url = format!( "{}/chat/completions", base_url( &config ) );
      let http_client = self.core.http_client().clone();
      let auth = self.auth_header();
      let additional_headers = config.additional_headers.clone();
      let additional_params = config.additional_params.clone();

      self.core.pipeline().execute_with_resilience( ctx, Operation::ChatCompletion, &model, move | _ctx |
      {
        let url = url.clone();
        let auth = auth.clone();
        let http_client = http_client.clone();
        let model = model.clone();
        let messages = request.messages.clone();
        let sampling = request.sampling.clone();
        let additional_headers = additional_headers.clone();
        let additional_params = additional_params.clone();
        async move
        {
          let wire = ChatRequestWire
          {
            model : &model,
            messages : messages.iter().map( | message | WireMessage { role : role_str( message.role ), content : &message.content } ).collect(),
            temperature : sampling.temperature,
            top_p : sampling.top_p,
            max_tokens : sampling.max_tokens,
            stop : sampling.stop,
            stream : false,
          };
          let body = merge_additional_params( &wire, &additional_params )?;
          let builder = http_client.post( &url ).header( "Authorization", &auth ).json( &body );
          let response = apply_additional_headers( builder, &additional_headers ).send().await?;
          if !response.status().is_success()
          {
            return Err( classify_error_response( response ).await );
          }
          let wire : ChatResponseWire = response.json().await?;
          Ok( ChatCompletionResponse
          {
            model : wire.model,
            choices : wire.choices.into_iter().map( | choice |
            {
              ChatChoice
              {
                message : ChatMessage::new( Role::Assistant, choice.message.content.unwrap_or_default() ),
                index : choice.index,
                finish_reason : choice.finish_reason,
              }
            } ).collect(),
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
      let url = format!( "{}/chat/completions", base_url( &config ) );
      let wire = ChatRequestWire
      {
        model : &model,
        messages : request.messages.iter().map( | message | WireMessage { role : role_str( message.role ), content : &message.content } ).collect(),
        temperature : request.sampling.temperature,
        top_p : request.sampling.top_p,
        max_tokens : request.sampling.max_tokens,
        stop : request.sampling.stop,
        stream : true,
      };

      let body = merge_additional_params( &wire, &config.additional_params )?;
      let builder = self.core.http_client().post( &url ).header( "Authorization", self.auth_header() ).json( &body );
      let response = apply_additional_headers( builder, &config.additional_headers ).send().await?;
      if !response.status().is_success()
      {
        return Err( classify_error_response( response ).await );
      }

      let mut event_stream = response.bytes_stream().eventsource();
      let mut aggregated_usage = None;

      while let Some( event ) = event_stream.next().await
      {
        if ctx.is_cancelled()
        {
          return Err( RuntimeError::Cancelled );
        }

        let event = event.map_err( | error | RuntimeError::Transport( format!( "SSE stream error : {error}" ) ) )?;
        if event.data == "[DONE]"
        {
          break;
        }

        let chunk : ChatStreamChunkWire = serde_json::from_str( &event.data )?;
        if let Some( usage ) = chunk.usage
        {
          aggregated_usage = Some( TokenUsage::from( usage ) );
        }

        if let Some( choice ) = chunk.choices.into_iter().next()
        {
          on_chunk( ChatCompletionChunk
          {
            delta : choice.delta.content.unwrap_or_default(),
            is_final : choice.finish_reason.is_some(),
            finish_reason : choice.finish_reason,
            usage : None,
          } );
        }
      }

      on_chunk( ChatCompletionChunk { delta : String::new(), is_final : true, finish_reason : None, usage : aggregated_usage } );
      Ok( () )
    }

    async fn create_embedding( &self, ctx : &CancellationContext, request : EmbeddingRequest ) -> RuntimeResult< EmbeddingResponse >
    {
      let config = self.core.config();
      let model = if request.model.is_empty() { config.default_model.clone() } else { request.model.clone() };
      let url = format!( "{}/embeddings", base_url( &config ) );
      let http_client = self.core.http_client().clone();
      let auth = self.auth_header();
      let additional_headers = config.additional_headers.clone();
      let additional_params = config.additional_params.clone();

      self.core.pipeline().execute_with_resilience( ctx, Operation::Embedding, &model, move | _ctx |
      {
        let url = url.clone();
        let auth = auth.clone();
        let http_client = http_client.clone();
        let model = model.clone();
        let input = request.input.clone();
        let additional_headers = additional_headers.clone();
        let additional_params = additional_params.clone();
        async move
        {
          let wire_input = match &input
          {
            EmbeddingInput::One( text ) => EmbeddingInputWire::One( text ),
            EmbeddingInput::Many( texts ) => EmbeddingInputWire::Many( texts ),
          };
          let wire = EmbeddingRequestWire { model : &model, input : wire_input };
          let body = merge_additional_params( &wire, &additional_params )?;
          let builder = http_client.post( &url ).header( "Authorization", &auth ).json( &body );
          let response = apply_additional_headers( builder, &additional_headers ).send().await?;
          if !response.status().is_success()
          {
            return Err( classify_error_response( response ).await );
          }
          let mut wire : EmbeddingResponseWire = response.json().await?;
          wire.data.sort_by_key( | datum | datum.index );
          Ok( EmbeddingResponse
          {
            model : wire.model,
            embeddings : wire.data.into_iter().map( | datum | datum.embedding ).collect(),
            usage : wire.usage.into(),
          } )
        }
      } ).await
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
      let config = ProviderConfig::new( ProviderType::new( "openai" ), "sk-test" );
      assert_eq!( base_url( &config ), DEFAULT_BASE_URL );
    }

    #[ test ]
    fn base_url_strips_trailing_slash_override()
    {
      let mut config = ProviderConfig::new( ProviderType::new( "openai" ), "sk-test" );
      config.base_url = "https://proxy.example.com/".to_string();
      assert_eq!( base_url( &config ), "https://proxy.example.com" );
    }

    #[ test ]
    fn count_tokens_uses_four_chars_per_token_heuristic()
    {
      let provider = OpenAiProvider::new( ProviderConfig::new( ProviderType::new( "openai" ), "sk-test" ), Arc::new( crate::logging::RequestLogger::default() ) ).unwrap();
      let tokens = tokio_test::block_on( provider.count_tokens( "twelve charss", "gpt-4" ) ).unwrap();
      assert_eq!( tokens, 4 );
    }

    #[ test ]
    fn wire_usage_converts_to_token_usage()
    {
      let wire = WireUsage { prompt_tokens : 10, completion_tokens : 5, total_tokens : 15 };
      let usage : TokenUsage = wire.into();
      assert_eq!( usage.total_tokens, 15 );
    }

    #[ test ]
    fn merge_additional_params_overlays_configured_keys()
    {
      let wire = TextRequestWire { model : "gpt-4", prompt : "hi", temperature : None, top_p : None, max_tokens : None, stop : Vec::new() };
      let mut params = HashMap::new();
      params.insert( "user".to_string(), serde_json::json!( "acct-123" ) );
      let merged = merge_additional_params( &wire, &params ).unwrap();
      assert_eq!( merged[ "model" ], serde_json::json!( "gpt-4" ) );
      assert_eq!( merged[ "user" ], serde_json::json!( "acct-123" ) );
    }
  }

} // end mod private

crate::mod_interface!
{
  exposed use
  {
    OpenAiProvider,
  };
}
