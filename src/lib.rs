//! Emulation host and real-time synchronization layer for embedding a Game
//! Boy core inside a larger host application.
//!
//! The emulator core itself is an external collaborator behind
//! [`emulator::EmulatorCore`]. This crate drives it at ~60 logical frames per
//! second on a background thread, publishes completed frames through a
//! single-slot buffer, bridges host input into joypad state, and wires
//! battery and link cable strategies into the core per content descriptor.
//! The shell owns rendering, input polling and content discovery and talks to
//! a session through [`session::ArcadeHost`].

/// Battery-backed save strategies and the save-scope selection policy.
pub mod battery;

/// Runtime content descriptor for a playable ROM entry.
pub mod content;

/// Controller bridge from host input events to joypad state.
pub mod controller;

/// On-screen geometry for the emulator display.
pub mod display;

/// Emulator core contract consumed by the host.
pub mod emulator;

/// Single-slot frame handoff between the emulation thread and the renderer.
pub mod frame;

/// Joypad state shared between the shell and the core.
pub mod joypad;

/// TCP-backed link cable transport.
pub mod remote_link;

/// Background execution loop and frame pacing.
pub mod runner;

/// Link cable contract and the same-process transport.
pub mod serial;

/// Session lifecycle and the host facade.
pub mod session;
