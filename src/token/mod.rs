// Copyright 2023 Contributors to the Veraison project.
// SPDX-License-Identifier: Apache-2.0

//! The token module decodes the JWS compact serialisation of a vTPM
//! attestation token into its [`TokenHeader`], [`TokenPayload`], signature
//! and signing input, see [`DecodedToken`].
//!
//! # Example
//!
//! ```
//! use vtpmtoken::token::{self, TokenHeader, TokenPayload};
//!
//! let h = TokenHeader::new("RS256");
//! let p = TokenPayload::new(
//!     "https://confidentialcomputing.googleapis.com",
//!     "flare-ai-social",
//!     1700000000,
//!     1700003600,
//!     "0123456789abcdef0123456789abcdef",
//!     "GCP_AMD_SEV",
//!     true,
//! );
//!
//! let si = token::encode_signing_input(&h, &p).expect("encoding token");
//! let raw = token::assemble(&si, b"not really a signature");
//!
//! let t = token::decode(&raw).expect("decoding token");
//!
//! assert_eq!(t.payload.hardware_model, "GCP_AMD_SEV");
//! assert_eq!(t.signed, si.as_bytes());
//! ```

pub use self::base64::Der;
pub use self::codec::{assemble, decode, encode_signing_input, DecodedToken};
pub use self::common::*;
pub use self::errors::Error;
pub use self::header::TokenHeader;
pub use self::payload::TokenPayload;
pub use self::signer::{ecdsa_coordinate_len, message_digest, sign};

mod base64;
mod codec;
mod common;
mod errors;
mod header;
mod payload;
mod signer;
