// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Collaborator traits and their reference implementations.

pub mod traits;
pub mod memory;
pub mod disk;
