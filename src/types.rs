//! Common data model shared by every provider : the shapes that flow through
//! the pipeline regardless of which upstream wire protocol produced them.

#[ allow( clippy::missing_inline_in_public_items ) ]
mod private
{
  use std::collections::BTreeSet;
  use std::time::SystemTime;

  /// Opaque string tag identifying an upstream provider (`"openai"`,
  /// `"anthropic"`, or a pluggable custom provider). Used as the partition
  /// key throughout the registry, cache, and usage tracker.
  #[ derive( Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize ) ]
  pub struct ProviderType( String );

  impl ProviderType
  {
    /// Construct a provider type tag from any string-like value.
    #[ must_use ]
    #[ inline ]
    pub fn new( name : impl Into< String > ) -> Self
    {
      Self( name.into() )
    }

    /// Borrow the tag as a plain string slice.
    #[ must_use ]
    #[ inline ]
    pub fn as_str( &self ) -> &str
    {
      &self.0
    }
  }

  impl core::fmt::Display for ProviderType
  {
    #[ inline ]
    fn fmt( &self, formatter : &mut core::fmt::Formatter< '_ > ) -> core::fmt::Result
    {
      write!( formatter, "{}", self.0 )
    }
  }

  impl From< &str > for ProviderType
  {
    #[ inline ]
    fn from( value : &str ) -> Self
    {
      Self::new( value )
    }
  }

  /// The category of a model, driving which request shapes it can serve.
  #[ derive( Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize ) ]
  #[ serde( rename_all = "kebab-case" ) ]
  pub enum ModelCategory
  {
    /// Legacy single-prompt completion.
    TextCompletion,
    /// Multi-turn chat completion.
    Chat,
    /// Vector embedding generation.
    Embedding,
    /// Image generation from a text prompt.
    ImageGen,
    /// Image understanding / analysis.
    ImageAnalysis,
  }

  /// A named feature a model supports.
  #[ derive( Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize ) ]
  #[ serde( rename_all = "kebab-case" ) ]
  pub enum Capability
  {
    /// Multi-turn chat completion.
    ChatCompletion,
    /// Legacy single-prompt completion.
    TextCompletion,
    /// Vector embedding generation.
    Embedding,
    /// Incremental token streaming.
    Streaming,
    /// Function-calling style tool use.
    FunctionCalling,
    /// Anthropic-style tool use.
    ToolUse,
    /// Constrained JSON-mode output.
    JsonMode,
    /// Image generation.
    ImageGen,
    /// Image analysis.
    ImageAnalysis,
  }

  /// Pricing for a model, in USD per 1000 tokens.
  #[ derive( Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize ) ]
  pub struct ModelPricing
  {
    /// Price per 1000 prompt tokens.
    pub prompt_per_1k : f64,
    /// Price per 1000 completion tokens.
    pub completion_per_1k : f64,
  }

  /// Metadata describing a single model offered by a provider.
  ///
  /// Invariant : a capability appears on a provider iff at least one of its
  /// models lists it — enforced by [`crate::provider::ProviderCore::set_models`]
  /// rebuilding the capability index from the model list on every write.
  #[ derive( Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize ) ]
  pub struct ModelInfo
  {
    /// Model identifier, as accepted by the owning provider's API.
    pub id : String,
    /// The provider that owns this model.
    pub provider : ProviderType,
    /// Model category.
    pub category : ModelCategory,
    /// Capabilities this model supports.
    pub capabilities : BTreeSet< Capability >,
    /// Maximum context window, in tokens.
    pub max_tokens : u32,
    /// Training data cutoff, if published.
    pub training_cutoff : Option< String >,
    /// Pricing, if published.
    pub pricing : Option< ModelPricing >,
  }

  /// The three-way token accounting carried by every completion response.
  #[ derive( Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize ) ]
  pub struct TokenUsage
  {
    /// Tokens consumed by the prompt / input.
    pub prompt_tokens : u32,
    /// Tokens produced by the completion / output.
    pub completion_tokens : u32,
    /// Sum of prompt and completion tokens.
    pub total_tokens : u32,
  }

  impl TokenUsage
  {
    /// Construct from prompt and completion counts, deriving the total.
    #[ must_use ]
    #[ inline ]
    pub fn new( prompt_tokens : u32, completion_tokens : u32 ) -> Self
    {
      Self { prompt_tokens, completion_tokens, total_tokens : prompt_tokens + completion_tokens }
    }
  }

  /// The role a chat message was authored under.
  #[ derive( Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize ) ]
  #[ serde( rename_all = "lowercase" ) ]
  pub enum Role
  {
    /// System / developer instruction.
    System,
    /// End-user message.
    User,
    /// Model-authored message.
    Assistant,
    /// Result of a tool / function call.
    Tool,
  }

  /// A reference to a function or tool the model invoked.
  #[ derive( Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize ) ]
  pub struct ToolCall
  {
    /// Identifier correlating the call with its result.
    pub id : String,
    /// Name of the invoked function or tool.
    pub name : String,
    /// JSON-encoded arguments passed to the function or tool.
    pub arguments : String,
  }

  /// A single chat message.
  #[ derive( Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize ) ]
  pub struct ChatMessage
  {
    /// Authoring role.
    pub role : Role,
    /// Textual content.
    pub content : String,
    /// Optional author name, for multi-agent transcripts.
    pub name : Option< String >,
    /// Tool/function calls this message requested, if any.
    pub tool_calls : Vec< ToolCall >,
    /// The tool-call id this message is a result for, if `role` is `Tool`.
    pub tool_call_id : Option< String >,
  }

  impl ChatMessage
  {
    /// Construct a plain message with no tool-call metadata.
    #[ must_use ]
    #[ inline ]
    pub fn new( role : Role, content : impl Into< String > ) -> Self
    {
      Self { role, content : content.into(), name : None, tool_calls : Vec::new(), tool_call_id : None }
    }
  }

  /// A callable tool/function definition offered to the model.
  #[ derive( Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize ) ]
  pub struct ToolDefinition
  {
    /// Tool/function name.
    pub name : String,
    /// Human-readable description.
    pub description : String,
    /// JSON Schema describing accepted parameters.
    pub parameters_schema : serde_json::Value,
  }

  /// Sampling parameters shared by completion requests.
  #[ derive( Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize ) ]
  pub struct SamplingParams
  {
    /// Sampling temperature.
    pub temperature : Option< f32 >,
    /// Nucleus sampling threshold.
    pub top_p : Option< f32 >,
    /// Maximum tokens to generate.
    pub max_tokens : Option< u32 >,
    /// Stop sequences.
    pub stop : Vec< String >,
  }

  impl Default for SamplingParams
  {
    #[ inline ]
    fn default() -> Self
    {
      Self { temperature : None, top_p : None, max_tokens : None, stop : Vec::new() }
    }
  }

  /// A legacy single-prompt completion request.
  #[ derive( Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize ) ]
  pub struct TextCompletionRequest
  {
    /// Model identifier; empty to use the provider's configured default.
    pub model : String,
    /// The prompt text.
    pub prompt : String,
    /// Sampling parameters.
    pub sampling : SamplingParams,
  }

  /// One candidate completion.
  #[ derive( Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize ) ]
  pub struct Choice
  {
    /// Generated text for this choice.
    pub text : String,
    /// Index of this choice among the response's choices.
    pub index : u32,
    /// Upstream-reported stop/finish reason, if any.
    pub finish_reason : Option< String >,
  }

  /// A legacy single-prompt completion response.
  #[ derive( Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize ) ]
  pub struct TextCompletionResponse
  {
    /// Model that produced this response.
    pub model : String,
    /// Candidate completions.
    pub choices : Vec< Choice >,
    /// Token accounting.
    pub usage : TokenUsage,
  }

  /// A multi-turn chat completion request.
  #[ derive( Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize ) ]
  pub struct ChatCompletionRequest
  {
    /// Model identifier; empty to use the provider's configured default.
    pub model : String,
    /// Conversation so far, oldest first.
    pub messages : Vec< ChatMessage >,
    /// Sampling parameters.
    pub sampling : SamplingParams,
    /// Tool/function definitions offered to the model, if any.
    pub tools : Vec< ToolDefinition >,
    /// Whether the caller wants incremental streaming (informational; the
    /// actual call is routed through `streaming_chat_completion` instead).
    pub stream : bool,
  }

  /// One candidate chat completion.
  #[ derive( Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize ) ]
  pub struct ChatChoice
  {
    /// The generated message.
    pub message : ChatMessage,
    /// Index of this choice among the response's choices.
    pub index : u32,
    /// Upstream-reported stop/finish reason, if any.
    pub finish_reason : Option< String >,
  }

  /// A multi-turn chat completion response.
  #[ derive( Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize ) ]
  pub struct ChatCompletionResponse
  {
    /// Model that produced this response.
    pub model : String,
    /// Candidate completions.
    pub choices : Vec< ChatChoice >,
    /// Token accounting.
    pub usage : TokenUsage,
  }

  /// One incremental chunk delivered to a streaming callback.
  #[ derive( Debug, Clone, PartialEq, Default, serde::Serialize, serde::Deserialize ) ]
  pub struct ChatCompletionChunk
  {
    /// Incremental text for this chunk, if any.
    pub delta : String,
    /// Whether this is the final chunk of the stream.
    pub is_final : bool,
    /// Upstream-reported stop/finish reason, present only on the final chunk.
    pub finish_reason : Option< String >,
    /// Aggregated token usage, present only on the final chunk.
    pub usage : Option< TokenUsage >,
  }

  /// Either a single input string or a batch, accepted by embedding requests.
  #[ derive( Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize ) ]
  #[ serde( untagged ) ]
  pub enum EmbeddingInput
  {
    /// A single text input.
    One( String ),
    /// A batch of text inputs.
    Many( Vec< String > ),
  }

  /// An embedding generation request.
  #[ derive( Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize ) ]
  pub struct EmbeddingRequest
  {
    /// Model identifier; empty to use the provider's configured default.
    pub model : String,
    /// Text(s) to embed.
    pub input : EmbeddingInput,
  }

  /// An embedding generation response.
  #[ derive( Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize ) ]
  pub struct EmbeddingResponse
  {
    /// Model that produced this response.
    pub model : String,
    /// One embedding vector per input, in input order.
    pub embeddings : Vec< Vec< f32 > >,
    /// Token accounting (embeddings have no completion tokens).
    pub usage : TokenUsage,
  }

  /// A cached value with an absolute expiration timestamp.
  ///
  /// A `CacheEntry`'s value type is known only to the caller of `get` —
  /// misreads are a programming error, not a runtime-enforced invariant.
  #[ derive( Debug, Clone ) ]
  pub struct CacheEntry< T >
  {
    /// The cached value.
    pub value : T,
    /// Absolute time after which this entry is considered expired.
    pub expires_at : SystemTime,
  }

  impl< T > CacheEntry< T >
  {
    /// Construct an entry expiring `ttl` from now.
    #[ must_use ]
    #[ inline ]
    pub fn new( value : T, ttl : std::time::Duration ) -> Self
    {
      Self { value, expires_at : SystemTime::now() + ttl }
    }

    /// Whether this entry is still valid as of now.
    #[ must_use ]
    #[ inline ]
    pub fn is_valid( &self ) -> bool
    {
      SystemTime::now() < self.expires_at
    }
  }

  #[ cfg( test ) ]
  mod tests
  {
    use super::*;
    use std::time::Duration;

    #[ test ]
    fn token_usage_sums_total()
    {
      let usage = TokenUsage::new( 17, 2 );
      assert_eq!( usage.total_tokens, 19 );
    }

    #[ test ]
    fn cache_entry_expires_after_ttl()
    {
      let entry = CacheEntry::new( 42, Duration::from_millis( 0 ) );
      std::thread::sleep( Duration::from_millis( 5 ) );
      assert!( !entry.is_valid() );
    }

    #[ test ]
    fn cache_entry_valid_within_ttl()
    {
      let entry = CacheEntry::new( "value", Duration::from_secs( 60 ) );
      assert!( entry.is_valid() );
    }

    #[ test ]
    fn provider_type_displays_as_tag()
    {
      let provider = ProviderType::new( "openai" );
      assert_eq!( format!( "{provider}" ), "openai" );
    }
  }

} // end mod private

crate::mod_interface!
{
  exposed use
  {
    ProviderType,
    ModelCategory,
    Capability,
    ModelPricing,
    ModelInfo,
    TokenUsage,
    Role,
    ToolCall,
    ChatMessage,
    ToolDefinition,
    SamplingParams,
    TextCompletionRequest,
    Choice,
    TextCompletionResponse,
    ChatCompletionRequest,
    ChatChoice,
    ChatCompletionResponse,
    ChatCompletionChunk,
    EmbeddingInput,
    EmbeddingRequest,
    EmbeddingResponse,
    CacheEntry,
  };
}
