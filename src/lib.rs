//! # Webview Bridge
//!
//! Host-side binding and dispatch layer for an embedded webview engine.
//!
//! ## Features
//!
//! - **Native Engine Adapter**: C-shaped engine function table, backed by the
//!   `webview` shared library or by an in-process headless engine
//! - **Thread Affinity**: host work always runs on the engine's creation thread
//! - **Binding Registry**: script-callable host callbacks with unique names
//! - **Interop Layer**: JSON wire functions with uniform error encoding and an
//!   ASCII-safe response filter
//! - **Reflective Binding**: expose individual methods of host types to script
//!
//! ## Architecture Design
//!
//! ```text
//! host threads ──▶ WebviewDispatcher ──▶ engine thread ──▶ NativeEngine
//!                                             │
//! script calls ◀── WebviewInterop ◀── NativeBinding ◀──────────┘
//! ```
//!
//! ### Example
//!
//! ```ignore
//! use webview_bridge::bindings::WebviewInterop;
//! use webview_bridge::core::{CoreOptions, WebviewCore};
//!
//! let core = Arc::new(WebviewCore::new(engine, CoreOptions::default())?);
//! let interop = WebviewInterop::new(Arc::clone(&core));
//! interop.bind("add", |args: Vec<Value>| Ok::<_, anyhow::Error>(args.len()))?;
//! core.run()?;
//! ```
//!
//! ## Modules
//!
//! - [`core`]: Core instance, dispatcher, registry and lifecycle
//! - [`platform`]: Native engine abstraction
//! - [`bindings`]: Script interop and reflective method binding
//! - [`config`]: Configuration

/// Core instance: dispatcher, registry, lifecycle and errors
pub mod core;
/// Native engine abstraction and its implementations
pub mod platform;
/// Script ⇄ host interop
pub mod bindings;
/// Configuration system
pub mod config;
