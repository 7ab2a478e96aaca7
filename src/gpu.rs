//------------------------------------------------------------------------------
//
// Copyright 2025 Jiri Bobek. All rights reserved.
// License: GPL 3.0 or later. See LICENSE.txt for details.
//
//------------------------------------------------------------------------------

pub mod backend;
pub mod cache;
pub mod config;
pub mod cpu;
pub mod dispatch;
pub mod kernels;
pub mod program;
pub mod shader;

pub use backend::{Backend, ExecutorError};
pub use cache::ProgramCache;
pub use config::KernelConfig;
pub use cpu::CpuBackend;
pub use program::{ProgramDescriptor, ProgramKind};
