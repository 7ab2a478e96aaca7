//------------------------------------------------------------------------------
//
// Copyright 2025 Jiri Bobek. All rights reserved.
// License: GPL 3.0 or later. See LICENSE.txt for details.
//
//------------------------------------------------------------------------------

pub mod expr;
pub mod ops;
pub mod preprocessor;
pub mod writer;

pub use expr::{CmpOp, Expr, ScalarExpr, ScalarFn, Stmt};
pub use writer::SourceWriter;
