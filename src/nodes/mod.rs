//! Decoder nodes
//!
//! Every decoder implements [`crate::runtime::Decoder`] plus either
//! [`crate::runtime::LogicDecoder`] or [`crate::runtime::StackedDecoder`],
//! and is run inside a [`crate::runtime::DecoderStack`].

pub mod decoders;
