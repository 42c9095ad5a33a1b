// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod apply_patch;
mod edit_file;
mod exec;
mod fetch;
mod glob;
mod grep;
mod read_file;
mod workspace;
mod write_file;

pub use apply_patch::ApplyPatchPrimitive;
pub use edit_file::EditFilePrimitive;
pub use exec::ExecPrimitive;
pub use fetch::FetchPrimitive;
pub use glob::GlobPrimitive;
pub use grep::GrepPrimitive;
pub use read_file::ReadFilePrimitive;
pub use workspace::{SaveFilePrimitive, SaveToolPrimitive};
pub use write_file::WriteFilePrimitive;
