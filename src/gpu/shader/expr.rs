//------------------------------------------------------------------------------
//
// Copyright 2025 Jiri Bobek. All rights reserved.
// License: GPL 3.0 or later. See LICENSE.txt for details.
//
//------------------------------------------------------------------------------

use std::fmt::Write;
use std::sync::Arc;

use smallvec::SmallVec;

use crate::tensor::{DType, DTypeKind};

//--------------------------------------------------------------------------------------------------

/// Comparison used by `select()` and early returns.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CmpOp {
	Lt,
	Le,
	Gt,
	Ge,
}

impl CmpOp {
	fn wgsl(self) -> &'static str {
		match self {
			Self::Lt => "<",
			Self::Le => "<=",
			Self::Gt => ">",
			Self::Ge => ">=",
		}
	}

	fn key(self) -> &'static str {
		match self {
			Self::Lt => "lt",
			Self::Le => "le",
			Self::Gt => "gt",
			Self::Ge => "ge",
		}
	}

	pub fn eval(self, a: f64, b: f64) -> bool {
		match self {
			Self::Lt => a < b,
			Self::Le => a <= b,
			Self::Gt => a > b,
			Self::Ge => a >= b,
		}
	}
}

//--------------------------------------------------------------------------------------------------

/// Scalar expression evaluated in the working precision of a kernel.
///
/// The expression is independent of the precision. The same tree renders to
/// `f16`, `f32` or `i32` code depending on the dtype passed to `render()`.
#[derive(Debug, PartialEq)]
pub enum ScalarExpr {
	/// The input scalar, named `a` in the generated code.
	Input,

	/// A value bound by `Stmt::Let`.
	Local(&'static str),

	Const(f64),

	Neg(Arc<ScalarExpr>),
	Abs(Arc<ScalarExpr>),
	Sign(Arc<ScalarExpr>),
	Exp(Arc<ScalarExpr>),
	Ln(Arc<ScalarExpr>),
	Sqrt(Arc<ScalarExpr>),

	/// Converts the value to `DType` and back to the working precision.
	RoundTo(DType, Arc<ScalarExpr>),

	Add(Arc<ScalarExpr>, Arc<ScalarExpr>),
	Sub(Arc<ScalarExpr>, Arc<ScalarExpr>),
	Mul(Arc<ScalarExpr>, Arc<ScalarExpr>),
	Div(Arc<ScalarExpr>, Arc<ScalarExpr>),
	Max(Arc<ScalarExpr>, Arc<ScalarExpr>),
	Min(Arc<ScalarExpr>, Arc<ScalarExpr>),

	/// `if lhs <op> rhs { on_true } else { on_false }`
	Select {
		op: CmpOp,
		lhs: Arc<ScalarExpr>,
		rhs: Arc<ScalarExpr>,
		on_true: Arc<ScalarExpr>,
		on_false: Arc<ScalarExpr>,
	},
}

impl ScalarExpr {
	/// Writes a compact structural encoding of the expression.
	///
	/// Two expressions have the same key iff they are structurally equal,
	/// so the key can stand in for the expression in a shader key.
	pub fn write_key(&self, out: &mut String) {
		let unary = |out: &mut String, name: &str, a: &Self| {
			out.push_str(name);
			out.push('(');
			a.write_key(out);
			out.push(')');
		};
		let binary = |out: &mut String, name: &str, a: &Self, b: &Self| {
			out.push_str(name);
			out.push('(');
			a.write_key(out);
			out.push(',');
			b.write_key(out);
			out.push(')');
		};
		match self {
			Self::Input => out.push_str("in"),
			Self::Local(name) => {
				let _ = write!(out, "${name}");
			},
			Self::Const(value) => {
				let _ = write!(out, "c{:x}", value.to_bits());
			},
			Self::Neg(a) => unary(out, "neg", a),
			Self::Abs(a) => unary(out, "abs", a),
			Self::Sign(a) => unary(out, "sign", a),
			Self::Exp(a) => unary(out, "exp", a),
			Self::Ln(a) => unary(out, "ln", a),
			Self::Sqrt(a) => unary(out, "sqrt", a),
			Self::RoundTo(dtype, a) => unary(out, &format!("round_{dtype}"), a),
			Self::Add(a, b) => binary(out, "add", a, b),
			Self::Sub(a, b) => binary(out, "sub", a, b),
			Self::Mul(a, b) => binary(out, "mul", a, b),
			Self::Div(a, b) => binary(out, "div", a, b),
			Self::Max(a, b) => binary(out, "max", a, b),
			Self::Min(a, b) => binary(out, "min", a, b),
			Self::Select { op, lhs, rhs, on_true, on_false } => {
				let _ = write!(out, "sel_{}(", op.key());
				lhs.write_key(out);
				out.push(',');
				rhs.write_key(out);
				out.push(',');
				on_true.write_key(out);
				out.push(',');
				on_false.write_key(out);
				out.push(')');
			},
		}
	}

	/// Collects the target dtypes of all `RoundTo` nodes, without duplicates.
	pub fn collect_dtypes(&self, out: &mut SmallVec<[DType; 2]>) {
		match self {
			Self::Input | Self::Local(_) | Self::Const(_) => {},
			Self::Neg(a) | Self::Abs(a) | Self::Sign(a) | Self::Exp(a) | Self::Ln(a) | Self::Sqrt(a) => {
				a.collect_dtypes(out);
			},
			Self::RoundTo(dtype, a) => {
				if !out.contains(dtype) {
					out.push(*dtype);
				}
				a.collect_dtypes(out);
			},
			Self::Add(a, b)
			| Self::Sub(a, b)
			| Self::Mul(a, b)
			| Self::Div(a, b)
			| Self::Max(a, b)
			| Self::Min(a, b) => {
				a.collect_dtypes(out);
				b.collect_dtypes(out);
			},
			Self::Select { lhs, rhs, on_true, on_false, .. } => {
				for e in [lhs, rhs, on_true, on_false] {
					e.collect_dtypes(out);
				}
			},
		}
	}

	/// Renders the expression as WGSL with `dtype` as the working type.
	pub fn render(&self, dtype: DType, out: &mut String) {
		let ty = wgsl_type_or_f32(dtype);
		let call = |out: &mut String, name: &str, a: &Self| {
			out.push_str(name);
			out.push('(');
			a.render(dtype, out);
			out.push(')');
		};
		let infix = |out: &mut String, op: &str, a: &Self, b: &Self| {
			out.push('(');
			a.render(dtype, out);
			let _ = write!(out, " {op} ");
			b.render(dtype, out);
			out.push(')');
		};
		let call2 = |out: &mut String, name: &str, a: &Self, b: &Self| {
			out.push_str(name);
			out.push('(');
			a.render(dtype, out);
			out.push_str(", ");
			b.render(dtype, out);
			out.push(')');
		};
		match self {
			Self::Input => out.push('a'),
			Self::Local(name) => out.push_str(name),
			Self::Const(value) => render_const(dtype, *value, out),
			Self::Neg(a) => {
				out.push_str("(-");
				a.render(dtype, out);
				out.push(')');
			},
			Self::Abs(a) => call(out, "abs", a),
			Self::Sign(a) => call(out, "sign", a),
			Self::Exp(a) => call(out, "exp", a),
			Self::Ln(a) => call(out, "log", a),
			Self::Sqrt(a) => call(out, "sqrt", a),
			Self::RoundTo(to, a) => {
				let to = wgsl_type_or_f32(*to);
				let _ = write!(out, "{ty}({to}(");
				a.render(dtype, out);
				out.push_str("))");
			},
			Self::Add(a, b) => infix(out, "+", a, b),
			Self::Sub(a, b) => infix(out, "-", a, b),
			Self::Mul(a, b) => infix(out, "*", a, b),
			Self::Div(a, b) => infix(out, "/", a, b),
			Self::Max(a, b) => call2(out, "max", a, b),
			Self::Min(a, b) => call2(out, "min", a, b),
			Self::Select { op, lhs, rhs, on_true, on_false } => {
				out.push_str("select(");
				on_false.render(dtype, out);
				out.push_str(", ");
				on_true.render(dtype, out);
				out.push_str(", ");
				lhs.render(dtype, out);
				let _ = write!(out, " {} ", op.wgsl());
				rhs.render(dtype, out);
				out.push(')');
			},
		}
	}

	/// Evaluates the expression on the host.
	///
	/// Every intermediate result is rounded to `dtype`, which mirrors what the
	/// generated code computes on the device.
	pub fn eval(&self, dtype: DType, a: f64, locals: &[(&'static str, f64)]) -> f64 {
		let ev = |e: &Self| e.eval(dtype, a, locals);
		let value = match self {
			Self::Input => a,
			Self::Local(name) => {
				locals.iter().rev().find(|(n, _)| n == name).map_or(f64::NAN, |(_, v)| *v)
			},
			Self::Const(value) => *value,
			Self::Neg(x) => -ev(x),
			Self::Abs(x) => ev(x).abs(),
			Self::Sign(x) => {
				let x = ev(x);
				if x > 0.0 {
					1.0
				} else if x < 0.0 {
					-1.0
				} else {
					0.0
				}
			},
			Self::Exp(x) => ev(x).exp(),
			Self::Ln(x) => ev(x).ln(),
			Self::Sqrt(x) => ev(x).sqrt(),
			Self::RoundTo(to, x) => to.round(ev(x)),
			Self::Add(x, y) => ev(x) + ev(y),
			Self::Sub(x, y) => ev(x) - ev(y),
			Self::Mul(x, y) => ev(x) * ev(y),
			Self::Div(x, y) => {
				let q = ev(x) / ev(y);
				if dtype.kind() == DTypeKind::Float { q } else { q.trunc() }
			},
			Self::Max(x, y) => ev(x).max(ev(y)),
			Self::Min(x, y) => ev(x).min(ev(y)),
			Self::Select { op, lhs, rhs, on_true, on_false } => {
				if op.eval(ev(lhs), ev(rhs)) { ev(on_true) } else { ev(on_false) }
			},
		};
		dtype.round(value)
	}
}

fn wgsl_type_or_f32(dtype: DType) -> &'static str {
	dtype.wgsl_type().unwrap_or("f32")
}

/// Renders a constant of type `dtype`.
///
/// Non-finite values cannot be written as WGSL literals, they are produced
/// by bit-casting the IEEE 754 single precision pattern instead.
fn render_const(dtype: DType, value: f64, out: &mut String) {
	let ty = wgsl_type_or_f32(dtype);
	if dtype.kind() != DTypeKind::Float {
		let _ = write!(out, "{ty}({})", dtype.round(value));
		return;
	}
	if value.is_finite() {
		let _ = write!(out, "{ty}({value:?})");
	} else {
		let bits: u32 = if value.is_nan() {
			0x7fc0_0000
		} else if value > 0.0 {
			0x7f80_0000
		} else {
			0xff80_0000
		};
		let _ = write!(out, "{ty}(bitcast<f32>({bits:#010x}u))");
	}
}

//--------------------------------------------------------------------------------------------------

/// Builder handle for `ScalarExpr` trees.
#[derive(Clone, Debug, PartialEq)]
pub struct Expr(pub Arc<ScalarExpr>);

impl Expr {
	pub fn input() -> Self {
		Self(Arc::new(ScalarExpr::Input))
	}

	pub fn local(name: &'static str) -> Self {
		Self(Arc::new(ScalarExpr::Local(name)))
	}

	pub fn c(value: f64) -> Self {
		Self(Arc::new(ScalarExpr::Const(value)))
	}

	pub fn abs(self) -> Self {
		Self(Arc::new(ScalarExpr::Abs(self.0)))
	}

	pub fn sign(self) -> Self {
		Self(Arc::new(ScalarExpr::Sign(self.0)))
	}

	pub fn exp(self) -> Self {
		Self(Arc::new(ScalarExpr::Exp(self.0)))
	}

	pub fn ln(self) -> Self {
		Self(Arc::new(ScalarExpr::Ln(self.0)))
	}

	pub fn sqrt(self) -> Self {
		Self(Arc::new(ScalarExpr::Sqrt(self.0)))
	}

	pub fn round_to(self, dtype: DType) -> Self {
		Self(Arc::new(ScalarExpr::RoundTo(dtype, self.0)))
	}

	pub fn max(self, rhs: Self) -> Self {
		Self(Arc::new(ScalarExpr::Max(self.0, rhs.0)))
	}

	pub fn min(self, rhs: Self) -> Self {
		Self(Arc::new(ScalarExpr::Min(self.0, rhs.0)))
	}

	pub fn select(op: CmpOp, lhs: Self, rhs: Self, on_true: Self, on_false: Self) -> Self {
		Self(Arc::new(ScalarExpr::Select {
			op,
			lhs: lhs.0,
			rhs: rhs.0,
			on_true: on_true.0,
			on_false: on_false.0,
		}))
	}
}

impl std::ops::Neg for Expr {
	type Output = Self;

	fn neg(self) -> Self {
		Self(Arc::new(ScalarExpr::Neg(self.0)))
	}
}

impl std::ops::Add<Self> for Expr {
	type Output = Self;

	fn add(self, rhs: Self) -> Self {
		Self(Arc::new(ScalarExpr::Add(self.0, rhs.0)))
	}
}

impl std::ops::Sub<Self> for Expr {
	type Output = Self;

	fn sub(self, rhs: Self) -> Self {
		Self(Arc::new(ScalarExpr::Sub(self.0, rhs.0)))
	}
}

impl std::ops::Mul<Self> for Expr {
	type Output = Self;

	fn mul(self, rhs: Self) -> Self {
		Self(Arc::new(ScalarExpr::Mul(self.0, rhs.0)))
	}
}

impl std::ops::Div<Self> for Expr {
	type Output = Self;

	fn div(self, rhs: Self) -> Self {
		Self(Arc::new(ScalarExpr::Div(self.0, rhs.0)))
	}
}

//--------------------------------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq)]
pub enum Stmt {
	Let(&'static str, Arc<ScalarExpr>),

	/// `if lhs <op> rhs { return value; }`
	ReturnIf {
		op: CmpOp,
		lhs: Arc<ScalarExpr>,
		rhs: Arc<ScalarExpr>,
		value: Arc<ScalarExpr>,
	},

	Return(Arc<ScalarExpr>),
}

/// Body of a scalar function `fn(a: T) -> T`.
///
/// The last statement of a well formed body is a `Return`.
#[derive(Clone, Debug, PartialEq)]
pub struct ScalarFn {
	name: &'static str,
	body: Arc<[Stmt]>,
}

impl ScalarFn {
	/// Builds a function consisting of a single `return expr;`.
	pub fn ret(name: &'static str, expr: Expr) -> Self {
		ScalarFnBuilder::new(name).ret(expr)
	}

	pub fn builder(name: &'static str) -> ScalarFnBuilder {
		ScalarFnBuilder::new(name)
	}

	/// Name used in logs. It is not part of the generated code or the key.
	pub fn name(&self) -> &'static str {
		self.name
	}

	pub fn body(&self) -> &[Stmt] {
		&self.body
	}

	pub fn key(&self) -> String {
		let mut out = String::new();
		for stmt in self.body.iter() {
			match stmt {
				Stmt::Let(name, e) => {
					let _ = write!(out, "let ${name}=");
					e.write_key(&mut out);
				},
				Stmt::ReturnIf { op, lhs, rhs, value } => {
					let _ = write!(out, "retif_{}(", op.key());
					lhs.write_key(&mut out);
					out.push(',');
					rhs.write_key(&mut out);
					out.push(',');
					value.write_key(&mut out);
					out.push(')');
				},
				Stmt::Return(e) => {
					out.push_str("ret(");
					e.write_key(&mut out);
					out.push(')');
				},
			}
			out.push(';');
		}
		out
	}

	/// Dtypes the body converts to, apart from the working precision.
	/// The generated module has to enable the extensions they need.
	pub fn dtypes(&self) -> SmallVec<[DType; 2]> {
		let mut out = SmallVec::new();
		for stmt in self.body.iter() {
			match stmt {
				Stmt::Let(_, e) | Stmt::Return(e) => e.collect_dtypes(&mut out),
				Stmt::ReturnIf { lhs, rhs, value, .. } => {
					lhs.collect_dtypes(&mut out);
					rhs.collect_dtypes(&mut out);
					value.collect_dtypes(&mut out);
				},
			}
		}
		out
	}

	/// Renders the statements, one per line, each prefixed by `indent`.
	pub fn render_body(&self, dtype: DType, indent: &str) -> Vec<String> {
		self.body
			.iter()
			.map(|stmt| {
				let mut line = String::from(indent);
				match stmt {
					Stmt::Let(name, e) => {
						let _ = write!(line, "let {name} = ");
						e.render(dtype, &mut line);
						line.push(';');
					},
					Stmt::ReturnIf { op, lhs, rhs, value } => {
						line.push_str("if (");
						lhs.render(dtype, &mut line);
						let _ = write!(line, " {} ", op.wgsl());
						rhs.render(dtype, &mut line);
						line.push_str(") { return ");
						value.render(dtype, &mut line);
						line.push_str("; }");
					},
					Stmt::Return(e) => {
						line.push_str("return ");
						e.render(dtype, &mut line);
						line.push(';');
					},
				}
				line
			})
			.collect()
	}

	pub fn eval(&self, dtype: DType, a: f64) -> f64 {
		let a = dtype.round(a);
		let mut locals: Vec<(&'static str, f64)> = Vec::new();
		for stmt in self.body.iter() {
			match stmt {
				Stmt::Let(name, e) => {
					let value = e.eval(dtype, a, &locals);
					locals.push((*name, value));
				},
				Stmt::ReturnIf { op, lhs, rhs, value } => {
					if op.eval(lhs.eval(dtype, a, &locals), rhs.eval(dtype, a, &locals)) {
						return value.eval(dtype, a, &locals);
					}
				},
				Stmt::Return(e) => return e.eval(dtype, a, &locals),
			}
		}
		debug_assert!(false, "ScalarFn `{}` has no return statement", self.name);
		f64::NAN
	}
}

pub struct ScalarFnBuilder {
	name: &'static str,
	body: Vec<Stmt>,
}

impl ScalarFnBuilder {
	pub fn new(name: &'static str) -> Self {
		Self { name, body: Vec::new() }
	}

	pub fn bind(mut self, name: &'static str, expr: Expr) -> Self {
		self.body.push(Stmt::Let(name, expr.0));
		self
	}

	pub fn return_if(mut self, op: CmpOp, lhs: Expr, rhs: Expr, value: Expr) -> Self {
		self.body.push(Stmt::ReturnIf { op, lhs: lhs.0, rhs: rhs.0, value: value.0 });
		self
	}

	pub fn ret(mut self, expr: Expr) -> ScalarFn {
		self.body.push(Stmt::Return(expr.0));
		ScalarFn { name: self.name, body: self.body.into() }
	}
}

//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
	use half::f16;

	use super::*;
	use crate::tensor::HasDType;

	#[test]
	fn test_render_relu() {
		let a = Expr::input();
		let f = ScalarFn::ret("relu", a.max(Expr::c(0.0)));
		assert_eq!(f.render_body(f16::dtype, ""), vec!["return max(a, f16(0.0));".to_string()]);
		assert_eq!(f.render_body(f32::dtype, "\t"), vec!["\treturn max(a, f32(0.0));".to_string()]);
	}

	#[test]
	fn test_key_is_structural() {
		let f1 = ScalarFn::ret("x", Expr::input() * Expr::input());
		let f2 = ScalarFn::ret("y", Expr::input() * Expr::input());
		let f3 = ScalarFn::ret("x", Expr::input() + Expr::input());
		assert_eq!(f1.key(), f2.key());
		assert_ne!(f1.key(), f3.key());
		assert_ne!(
			ScalarFn::ret("c", Expr::c(1.0)).key(),
			ScalarFn::ret("c", Expr::c(1.5)).key()
		);
	}

	#[test]
	fn test_select_and_return_if() {
		let a = Expr::input();
		let f = ScalarFn::builder("log")
			.return_if(CmpOp::Lt, a.clone(), Expr::c(0.0), Expr::c(f64::INFINITY))
			.ret(a.ln());
		let lines = f.render_body(f32::dtype, "");
		assert_eq!(lines[0], "if (a < f32(0.0)) { return f32(bitcast<f32>(0x7f800000u)); }");
		assert_eq!(lines[1], "return log(a);");
		assert_eq!(f.eval(f32::dtype, -1.0), f64::INFINITY);
		assert_eq!(f.eval(f32::dtype, 1.0), 0.0);

		let s = Expr::select(CmpOp::Ge, Expr::input(), Expr::c(0.0), Expr::input(), -Expr::input());
		let mut out = String::new();
		s.0.render(f32::dtype, &mut out);
		assert_eq!(out, "select((-a), a, a >= f32(0.0))");
	}

	#[test]
	fn test_eval_rounds_to_working_precision() {
		let f = ScalarFn::ret("third", Expr::input() / Expr::c(3.0));
		let x = f.eval(f16::dtype, 1.0);
		assert_eq!(x, f16::dtype.round(1.0 / 3.0));
		assert_ne!(x, 1.0 / 3.0);
		assert_eq!(f.eval(i32::dtype, 7.0), 2.0);
	}

	#[test]
	fn test_dtypes() {
		let a = Expr::input();
		let f = ScalarFn::builder("mixed")
			.bind("h", a.clone().round_to(f16::dtype))
			.return_if(CmpOp::Lt, a.clone(), Expr::c(0.0), a.clone().round_to(i32::dtype))
			.ret(Expr::local("h").round_to(f16::dtype) + a.clone());
		assert_eq!(f.dtypes().as_slice(), &[f16::dtype, i32::dtype]);
		assert!(ScalarFn::ret("relu", a.max(Expr::c(0.0))).dtypes().is_empty());
	}

	#[test]
	fn test_locals() {
		let f = ScalarFn::builder("twice")
			.bind("t", Expr::input() + Expr::input())
			.ret(Expr::local("t") * Expr::c(0.5));
		assert_eq!(f.eval(f32::dtype, 3.0), 3.0);
		assert_eq!(f.render_body(f32::dtype, "")[0], "let t = (a + a);");
	}
}
