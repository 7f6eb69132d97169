//! Shared UI icons and emojis.
//!
//! This module provides common emoji constants used across the UI components
//! for consistent visual styling.

use console::Emoji;

// Status indicators
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "[OK]");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "[ERR]");
pub static SPARKLE: Emoji<'_, '_> = Emoji("✨ ", "*");

// Run indicators
pub static RUNNING: Emoji<'_, '_> = Emoji("▶️  ", "[>]");
pub static GATE: Emoji<'_, '_> = Emoji("🚦 ", "[GATE]");
pub static LOOP: Emoji<'_, '_> = Emoji("🔄 ", "[LOOP]");
pub static HALT: Emoji<'_, '_> = Emoji("🚧 ", "[HALT]");
pub static ARTIFACT: Emoji<'_, '_> = Emoji("📄 ", "+");
