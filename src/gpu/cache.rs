//------------------------------------------------------------------------------
//
// Copyright 2025 Jiri Bobek. All rights reserved.
// License: GPL 3.0 or later. See LICENSE.txt for details.
//
//------------------------------------------------------------------------------

use std::hash::{BuildHasher, RandomState};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use hashbrown::HashTable;

use crate::ErrPack;
use crate::gpu::backend::ExecutorError;
use crate::gpu::program::ProgramDescriptor;

//--------------------------------------------------------------------------------------------------

pub struct CachedProgram<T> {
	/// Index in the order of compilation.
	pub id: usize,
	pub key: String,
	pub source: String,
	pub compiled: T,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
	pub programs: usize,
	pub hits: usize,
	pub misses: usize,
}

struct ProgramMapEntry {
	key_hash: u64,
	id: usize,
}

struct CacheInner<T> {
	programs: Vec<Arc<CachedProgram<T>>>,
	map: HashTable<ProgramMapEntry>,
	hasher: RandomState,
}

impl<T> CacheInner<T> {
	fn get(&self, key: &str) -> Option<&Arc<CachedProgram<T>>> {
		let key_hash = self.hasher.hash_one(key);
		self.map
			.find(key_hash, |entry| {
				entry.key_hash == key_hash && self.programs[entry.id].key == key
			})
			.map(|entry| &self.programs[entry.id])
	}

	fn insert_unique(&mut self, program: Arc<CachedProgram<T>>) {
		let key_hash = self.hasher.hash_one(program.key.as_str());
		let id = program.id;
		self.programs.push(program);
		self.map.insert_unique(key_hash, ProgramMapEntry { key_hash, id }, |entry| entry.key_hash);
	}
}

/// Compiled programs, indexed by shader key.
///
/// Each key is compiled at most once. Lookups take a shared lock, so
/// concurrent dispatches of already compiled programs don't block each other.
pub struct ProgramCache<T> {
	inner: RwLock<CacheInner<T>>,
	hits: AtomicUsize,
	misses: AtomicUsize,
}

impl<T> Default for ProgramCache<T> {
	fn default() -> Self {
		Self::new()
	}
}

impl<T> ProgramCache<T> {
	pub fn new() -> Self {
		Self {
			inner: RwLock::new(CacheInner {
				programs: Vec::new(),
				map: HashTable::new(),
				hasher: RandomState::new(),
			}),
			hits: AtomicUsize::new(0),
			misses: AtomicUsize::new(0),
		}
	}

	fn find(
		inner: &CacheInner<T>,
		program: &ProgramDescriptor,
	) -> Option<Result<Arc<CachedProgram<T>>, ErrPack<ExecutorError>>> {
		let cached = inner.get(&program.shader_key)?;
		if cached.source != program.source {
			log::error!(
				"shader key collision: {:?}\ncached source:\n{}\nnew source:\n{}",
				program.shader_key,
				cached.source,
				program.source
			);
			return Some(Err(ExecutorError::key_collision(&program.shader_key)));
		}
		Some(Ok(cached.clone()))
	}

	/// Returns the program compiled for `program.shader_key`, compiling it with
	/// `compile` on the first request.
	///
	/// Fails with `KeyCollision` if the cached program was compiled from
	/// different source.
	pub fn get_or_compile(
		&self,
		program: &ProgramDescriptor,
		compile: impl FnOnce(&ProgramDescriptor) -> Result<T, ErrPack<ExecutorError>>,
	) -> Result<Arc<CachedProgram<T>>, ErrPack<ExecutorError>> {
		{
			let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
			if let Some(result) = Self::find(&inner, program) {
				self.hits.fetch_add(1, Ordering::Relaxed);
				return result;
			}
		}

		let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
		// another thread may have compiled it while we were waiting for the lock
		if let Some(result) = Self::find(&inner, program) {
			self.hits.fetch_add(1, Ordering::Relaxed);
			return result;
		}
		self.misses.fetch_add(1, Ordering::Relaxed);

		let id = inner.programs.len();
		log::debug!("compiling program #{id}: {}", program.shader_key);
		let compiled = compile(program)?;
		let cached = Arc::new(CachedProgram {
			id,
			key: program.shader_key.clone(),
			source: program.source.clone(),
			compiled,
		});
		inner.insert_unique(cached.clone());
		Ok(cached)
	}

	pub fn contains(&self, key: &str) -> bool {
		let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
		inner.get(key).is_some()
	}

	pub fn len(&self) -> usize {
		let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
		inner.programs.len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	pub fn stats(&self) -> CacheStats {
		CacheStats {
			programs: self.len(),
			hits: self.hits.load(Ordering::Relaxed),
			misses: self.misses.load(Ordering::Relaxed),
		}
	}
}

//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
	use std::thread;

	use super::*;
	use crate::gpu::kernels::UnaryOpProgram;
	use crate::gpu::shader::ops;
	use crate::tensor::{HasDType, Shape};

	fn relu(shape: &[usize]) -> ProgramDescriptor {
		UnaryOpProgram::new(&Shape::new(shape), ops::relu(), f32::dtype, f32::dtype).descriptor()
	}

	#[test]
	fn test_compiles_once_per_key() {
		let cache = ProgramCache::new();
		let mut compiles = 0;
		for shape in [[2, 6], [3, 4], [4, 3], [2, 6]] {
			let program = relu(&shape);
			let cached = cache
				.get_or_compile(&program, |p| {
					compiles += 1;
					Ok(p.source.len())
				})
				.unwrap();
			assert_eq!(cached.id, 0);
		}
		assert_eq!(compiles, 1);
		assert_eq!(cache.stats(), CacheStats { programs: 1, hits: 3, misses: 1 });

		let other = relu(&[300]);
		assert!(!cache.contains(&other.shader_key));
		let cached = cache.get_or_compile(&other, |p| Ok(p.source.len())).unwrap();
		assert_eq!(cached.id, 1);
		assert_eq!(cache.len(), 2);
	}

	#[test]
	fn test_many_keys() {
		let cache = ProgramCache::new();
		for n in 1..=100 {
			let cached = cache.get_or_compile(&relu(&[n]), |_| Ok(n)).unwrap();
			assert_eq!(cached.id, n - 1);
		}
		assert_eq!(cache.len(), 100);
		for n in (1..=100).rev() {
			let program = relu(&[n]);
			assert!(cache.contains(&program.shader_key));
			let cached = cache.get_or_compile(&program, |_| Ok(0)).unwrap();
			assert_eq!(cached.compiled, n);
			assert_eq!(cached.key, program.shader_key);
		}
		assert_eq!(cache.stats(), CacheStats { programs: 100, hits: 100, misses: 100 });
	}

	#[test]
	fn test_key_collision() {
		let cache = ProgramCache::new();
		let program = relu(&[256]);
		cache.get_or_compile(&program, |_| Ok(())).unwrap();

		let mut forged = relu(&[256]);
		forged.source.push_str("// different\n");
		let err = cache.get_or_compile(&forged, |_| Ok(())).err().unwrap();
		assert_eq!(err.code, ExecutorError::KeyCollision);
	}

	#[test]
	fn test_compile_error_is_not_cached() {
		let cache: ProgramCache<()> = ProgramCache::new();
		let program = relu(&[256]);
		let err = cache
			.get_or_compile(&program, |_| Err(ErrPack::new(ExecutorError::InvalidBuffer)))
			.err()
			.unwrap();
		assert_eq!(err.code, ExecutorError::InvalidBuffer);
		assert!(cache.is_empty());
		assert!(cache.get_or_compile(&program, |_| Ok(())).is_ok());
		assert_eq!(cache.len(), 1);
	}

	#[test]
	fn test_concurrent_lookups() {
		let cache = ProgramCache::new();
		let compiles = AtomicUsize::new(0);
		thread::scope(|s| {
			for _ in 0..8 {
				s.spawn(|| {
					for shape in [[2, 6], [3, 4], [256, 1]] {
						let program = relu(&shape);
						let cached = cache
							.get_or_compile(&program, |p| {
								compiles.fetch_add(1, Ordering::Relaxed);
								Ok(p.shader_key.clone())
							})
							.unwrap();
						assert_eq!(cached.compiled, program.shader_key);
					}
				});
			}
		});
		assert_eq!(compiles.load(Ordering::Relaxed), 2);
		assert_eq!(cache.len(), 2);
	}
}
