//! A `secrecy`-backed wrapper around credential material, with an env/file
//! fallback chain for locating it.
//!
//! Grounded on the teacher's `secret.rs` (`Secret(SecretString)`, `new`,
//! `load_from_env`, `load_with_path`, `load_with_fallbacks`). The teacher's
//! third fallback tier reaches into `workspace_tools`' monorepo-wide secrets
//! directory; this crate is not itself part of that monorepo and carries no
//! `workspace_tools` dependency, so the chain here stops at env var then a
//! file path named by a companion `<VAR>_FILE` env var — recorded as a
//! deliberate narrowing in `DESIGN.md` rather than a silent drop.

#[ allow( clippy::missing_inline_in_public_items ) ]
mod private
{
  use crate::error::RuntimeError;
  use secrecy::{ ExposeSecret, SecretString };

  /// Wraps a credential so it cannot be accidentally printed via `Debug` or
  /// logged; call [`Secret::expose`] at the one call site that needs the
  /// plaintext (building an auth header).
  #[ derive( Clone ) ]
  pub struct Secret( SecretString );

  impl core::fmt::Debug for Secret
  {
    #[ inline ]
    fn fmt( &self, formatter : &mut core::fmt::Formatter< '_ > ) -> core::fmt::Result
    {
      formatter.write_str( "Secret(<redacted>)" )
    }
  }

  impl Secret
  {
    /// Wrap `value` directly, with no validation beyond non-emptiness.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::InvalidConfig`] if `value` is empty after
    /// trimming.
    #[ inline ]
    pub fn new( value : String ) -> Result< Self, RuntimeError >
    {
      if value.trim().is_empty()
      {
        return Err( RuntimeError::InvalidConfig( "credential must not be empty".to_string() ) );
      }
      Ok( Self( SecretString::from( value ) ) )
    }

    /// Borrow the plaintext credential. Callers should hold the result only
    /// as long as it takes to use it (e.g. building one auth header).
    #[ must_use ]
    #[ inline ]
    pub fn expose( &self ) -> &str
    {
      self.0.expose_secret()
    }

    /// Load from the environment variable `env_var`.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::InvalidConfig`] if the variable is unset or
    /// empty.
    #[ inline ]
    pub fn load_from_env( env_var : &str ) -> Result< Self, RuntimeError >
    {
      let value = std::env::var( env_var )
        .map_err( | _ | RuntimeError::InvalidConfig( format!( "missing environment variable {env_var}" ) ) )?;
      Self::new( value )
    }

    /// Load from the file named by the environment variable `path_env_var`.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::InvalidConfig`] if the path variable is
    /// unset or the named file cannot be read.
    #[ inline ]
    pub fn load_from_file_env( path_env_var : &str ) -> Result< Self, RuntimeError >
    {
      let path = std::env::var( path_env_var )
        .map_err( | _ | RuntimeError::InvalidConfig( format!( "missing environment variable {path_env_var}" ) ) )?;
      let contents = std::fs::read_to_string( &path )
        .map_err( | error | RuntimeError::InvalidConfig( format!( "failed to read secret file {path} : {error}" ) ) )?;
      Self::new( contents.trim().to_string() )
    }

    /// Try `env_var` first, then `<env_var>_FILE` as a path to a file
    /// holding the credential. This is the fallback chain
    /// [`crate::registry::EnvConfigSource`] uses to resolve a provider's
    /// `api_key`.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::InvalidConfig`] if neither source yields a
    /// non-empty credential.
    #[ inline ]
    pub fn load_with_fallback( env_var : &str ) -> Result< Self, RuntimeError >
    {
      if let Ok( secret ) = Self::load_from_env( env_var )
      {
        return Ok( secret );
      }
      Self::load_from_file_env( &format!( "{env_var}_FILE" ) )
    }
  }

  #[ cfg( test ) ]
  mod tests
  {
    use super::Secret;
    use std::sync::Mutex;

    static ENV_LOCK : Mutex< () > = Mutex::new( () );

    #[ test ]
    fn new_rejects_empty_value()
    {
      assert!( Secret::new( String::new() ).is_err() );
      assert!( Secret::new( "   ".to_string() ).is_err() );
    }

    #[ test ]
    fn debug_never_prints_plaintext()
    {
      let secret = Secret::new( "sk-super-secret".to_string() ).unwrap();
      assert!( !format!( "{secret:?}" ).contains( "sk-super-secret" ) );
    }

    #[ test ]
    fn load_from_env_round_trips()
    {
      let _guard = ENV_LOCK.lock().unwrap_or_else( std::sync::PoisonError::into_inner );
      std::env::set_var( "LLM_RUNTIME_TEST_SECRET", "sk-from-env" );
      let secret = Secret::load_from_env( "LLM_RUNTIME_TEST_SECRET" ).unwrap();
      assert_eq!( secret.expose(), "sk-from-env" );
      std::env::remove_var( "LLM_RUNTIME_TEST_SECRET" );
    }

    #[ test ]
    fn load_from_env_missing_errors()
    {
      let _guard = ENV_LOCK.lock().unwrap_or_else( std::sync::PoisonError::into_inner );
      std::env::remove_var( "LLM_RUNTIME_TEST_SECRET_MISSING" );
      assert!( Secret::load_from_env( "LLM_RUNTIME_TEST_SECRET_MISSING" ).is_err() );
    }

    #[ test ]
    fn load_with_fallback_reads_file_when_env_unset()
    {
      let _guard = ENV_LOCK.lock().unwrap_or_else( std::sync::PoisonError::into_inner );
      let dir = tempfile::tempdir().unwrap();
      let path = dir.path().join( "key" );
      std::fs::write( &path, "sk-from-file\n" ).unwrap();
      std::env::remove_var( "LLM_RUNTIME_TEST_FALLBACK" );
      std::env::set_var( "LLM_RUNTIME_TEST_FALLBACK_FILE", path.to_str().unwrap() );
      let secret = Secret::load_with_fallback( "LLM_RUNTIME_TEST_FALLBACK" ).unwrap();
      assert_eq!( secret.expose(), "sk-from-file" );
      std::env::remove_var( "LLM_RUNTIME_TEST_FALLBACK_FILE" );
    }
  }

} // end mod private

crate::mod_interface!
{
  exposed use
  {
    Secret,
  };
}
