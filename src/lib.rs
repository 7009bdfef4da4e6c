//! # drive-qa
//!
//! Browse a cloud file store and ask questions about the files in it.
//!
//! A listing request resolves a drive path, a share link or a team-site URL
//! into a uniform list of items, each decorated with the caller's effective
//! read/write capabilities. A question request downloads the selected files,
//! extracts their text, joins it into one delimited context and asks a
//! language model to answer from that context.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │   Resolver   │──▶│ Permissions  │──▶│   Listing    │
//! │ path/share/  │   │ roles → caps │   │    JSON      │
//! │    site      │   └──────────────┘   └──────────────┘
//! └──────────────┘
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │  Assembler   │──▶│  Extractor   │──▶│ Budget + LLM │
//! │ fetch files  │   │ pdf/docx/... │   │   answer     │
//! └──────────────┘   └──────────────┘   └──────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Error taxonomy |
//! | [`credential`] | Request-scoped bearer token |
//! | [`remote`] | Storage provider client |
//! | [`endpoints`] | Provider URL builders |
//! | [`permissions`] | Role aggregation |
//! | [`resolver`] | Address classification and listing |
//! | [`extract`] | Multi-format text extraction |
//! | [`assemble`] | Context assembly |
//! | [`llm`] | Chat-completion client |
//! | [`chat`] | Context budget and question answering |
//! | [`server`] | HTTP server |

pub mod assemble;
pub mod chat;
pub mod config;
pub mod credential;
pub mod endpoints;
pub mod error;
pub mod extract;
pub mod llm;
pub mod models;
pub mod permissions;
pub mod remote;
pub mod resolver;
pub mod server;
