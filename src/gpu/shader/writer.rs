//------------------------------------------------------------------------------
//
// Copyright 2025 Jiri Bobek. All rights reserved.
// License: GPL 3.0 or later. See LICENSE.txt for details.
//
//------------------------------------------------------------------------------

use std::fmt::{Display, Write};

use crate::gpu::shader::expr::ScalarFn;
use crate::tensor::DType;

//--------------------------------------------------------------------------------------------------

/// Accumulates shader source together with its shader key.
///
/// The source is built from fixed templates. Anything that can make two sources
/// differ has to be fed through the writer:
/// - `lit()` for values substituted into the text,
/// - `param()` for values that select which template text is emitted,
/// - `scalar_fn()` for operation bodies.
///
/// Each of them appends to the key, so two programs with equal keys were built
/// from the same templates with the same substitutions and have identical source.
pub struct SourceWriter {
	source: String,
	key: String,
	indent: usize,
}

const KEY_SEPARATOR: char = '|';

impl SourceWriter {
	pub fn new(program: &str) -> Self {
		Self {
			source: String::new(),
			key: program.to_string(),
			indent: 0,
		}
	}

	/// Records `value` in the key and returns its text for substitution.
	pub fn lit<T: Display>(&mut self, value: T) -> String {
		let text = value.to_string();
		debug_assert!(!text.contains(KEY_SEPARATOR));
		self.key.push(KEY_SEPARATOR);
		self.key.push_str(&text);
		text
	}

	/// Float literal, always written with a fractional part.
	pub fn lit_f32(&mut self, value: f32) -> String {
		self.lit(format!("{value:?}"))
	}

	/// Records a template choice in the key.
	pub fn param<T: Display>(&mut self, name: &str, value: T) {
		let _ = write!(self.key, "{KEY_SEPARATOR}{name}={value}");
	}

	pub fn line(&mut self, text: &str) {
		if !text.is_empty() {
			for _ in 0..self.indent {
				self.source.push('\t');
			}
			self.source.push_str(text);
		}
		self.source.push('\n');
	}

	/// Emits `text` and increases the indentation of the following lines.
	pub fn open(&mut self, text: &str) {
		self.line(text);
		self.indent += 1;
	}

	/// Decreases the indentation and emits `text`.
	pub fn close(&mut self, text: &str) {
		debug_assert!(self.indent > 0);
		self.indent = self.indent.saturating_sub(1);
		self.line(text);
	}

	/// Emits `fn {name}(a: T) -> T { ... }` for the working precision `dtype`.
	pub fn scalar_fn(&mut self, name: &str, f: &ScalarFn, dtype: DType) {
		let name = self.lit(name);
		let ty = self.lit(dtype.wgsl_type().unwrap_or("f32"));
		let op_key = f.key();
		self.key.push(KEY_SEPARATOR);
		self.key.push_str(&op_key);

		self.open(&format!("fn {name}(a: {ty}) -> {ty} {{"));
		for line in f.render_body(dtype, "") {
			self.line(&line);
		}
		self.close("}");
	}

	pub fn key(&self) -> &str {
		&self.key
	}

	/// Returns `(source, key)`.
	pub fn finish(self) -> (String, String) {
		debug_assert!(self.indent == 0);
		(self.source, self.key)
	}
}

//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
	use super::*;
	use crate::gpu::shader::expr::Expr;
	use crate::tensor::HasDType;

	#[test]
	fn test_lit_goes_into_key() {
		let mut w = SourceWriter::new("test");
		let n = w.lit(300);
		w.param("fit", false);
		w.open(&format!("if (i < {n}) {{"));
		w.line("x();");
		w.close("}");
		let (source, key) = w.finish();
		assert_eq!(source, "if (i < 300) {\n\tx();\n}\n");
		assert_eq!(key, "test|300|fit=false");
	}

	#[test]
	fn test_scalar_fn() {
		let mut w = SourceWriter::new("k");
		let f = ScalarFn::ret("sq", Expr::input() * Expr::input());
		w.scalar_fn("unaryOperation", &f, f32::dtype);
		let (source, key) = w.finish();
		assert_eq!(source, "fn unaryOperation(a: f32) -> f32 {\n\treturn (a * a);\n}\n");
		assert_eq!(key, format!("k|unaryOperation|f32|{}", f.key()));
	}

	#[test]
	fn test_float_literal() {
		let mut w = SourceWriter::new("k");
		assert_eq!(w.lit_f32(4.0), "4.0");
		assert_eq!(w.lit_f32(0.5), "0.5");
		assert_eq!(w.key(), "k|4.0|0.5");
	}
}
