//! Concrete, thin `Provider` implementations exercising the pipeline over
//! two distinct upstream wire conventions.
//!
//! Grounded on the teacher's `components/mod.rs` directory-layer shape :
//! submodules declared outside `mod private`, exposed by name through
//! `mod_interface!` rather than re-exported item by item.

mod private
{
}

#[ cfg( feature = "providers-openai" ) ]
pub mod openai;
#[ cfg( feature = "providers-anthropic" ) ]
pub mod anthropic;

crate::mod_interface!
{
  #[ cfg( feature = "providers-openai" ) ]
  exposed use openai;
  #[ cfg( feature = "providers-anthropic" ) ]
  exposed use anthropic;
}
