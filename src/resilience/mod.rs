// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Resilience helpers for the collaborator boundary.
//!
//! The engine itself never retries and never times out; these wrap the
//! remote and binary store so a stuck call cannot hang a sync forever, and
//! give callers a backoff loop for the operations that surface errors.

pub mod retry;
pub mod timeout;
