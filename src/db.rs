//! The state database.
//!
//! States are factored into an explicit key (hashed and compared byte-wise)
//! and a container of symbolic candidates under that key. A new symbolic
//! part is "seen" when an existing candidate subsumes it; otherwise it is
//! appended and receives a fresh id.

use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

use crate::blob::{Blob, BlobReader, BlobWriter};
use crate::context::CtxRef;
use crate::error::DatabaseError;
use crate::store::SymStore;

/// Stable identifier of a stored state: explicit id paired with the id
/// assigned by the candidate container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct StateId {
    pub exp: u64,
    pub sym: u64,
}

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}, {}>", self.exp, self.sym)
    }
}

/// Which blob bytes identify an explicit key.
pub trait KeySpan {
    fn span(blob: &Blob) -> &[u8];
}

/// Reachability keys on the explicit region alone.
pub struct ExplicitSpan;

impl KeySpan for ExplicitSpan {
    fn span(blob: &Blob) -> &[u8] {
        blob.explicit()
    }
}

/// The LTL driver keys on user + explicit, so the same program state under a
/// different Büchi state stays distinct.
pub struct ExplicitUserSpan;

impl KeySpan for ExplicitUserSpan {
    fn span(blob: &Blob) -> &[u8] {
        blob.user_explicit()
    }
}

struct Key<K> {
    blob: Blob,
    _span: PhantomData<K>,
}

impl<K: KeySpan> PartialEq for Key<K> {
    fn eq(&self, other: &Self) -> bool {
        K::span(&self.blob) == K::span(&other.blob)
    }
}

impl<K: KeySpan> Eq for Key<K> {}

impl<K: KeySpan> Hash for Key<K> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        K::span(&self.blob).hash(state);
    }
}

/// Decides whether a fresh symbolic part is covered by a stored one.
pub trait CandidateHit<S> {
    fn hit(&self, fresh: &S, stored: &S) -> bool;
}

/// The default policy: subsumption.
#[derive(Debug, Default, Clone, Copy)]
pub struct SubsetHit;

impl<S: SymStore> CandidateHit<S> for SubsetHit {
    fn hit(&self, fresh: &S, stored: &S) -> bool {
        S::subseteq(fresh, stored)
    }
}

/// Exact syntactic equality, interface-compatible with [`SubsetHit`].
#[derive(Debug, Default, Clone, Copy)]
pub struct EqualHit;

impl<S: SymStore + PartialEq> CandidateHit<S> for EqualHit {
    fn hit(&self, fresh: &S, stored: &S) -> bool {
        fresh == stored
    }
}

/// Linear candidate container. The scan is cheap in practice: most symbolic
/// states under one explicit key subsume each other within a few candidates.
#[derive(Debug, Clone, Default)]
pub struct LinearCandidates<S> {
    data: Vec<S>,
}

impl<S> LinearCandidates<S> {
    /// Ids are 1-based so 0 can never name a candidate.
    pub fn insert(&mut self, state: S) -> u64 {
        self.data.push(state);
        self.data.len() as u64
    }

    pub fn insert_check(&mut self, state: S, hit: &impl CandidateHit<S>) -> (bool, u64) {
        for (index, stored) in self.data.iter().enumerate() {
            if hit.hit(&state, stored) {
                return (false, index as u64 + 1);
            }
        }
        (true, self.insert(state))
    }

    pub fn get(&self, id: u64) -> Option<&S> {
        self.data.get(id.checked_sub(1)? as usize)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

struct Item<S> {
    explicit_id: u64,
    blob: Blob,
    candidates: LinearCandidates<S>,
}

pub struct Database<S: SymStore, H: CandidateHit<S>, K: KeySpan> {
    ctx: CtxRef,
    hit: H,
    items: Vec<Item<S>>,
    state2item: HashMap<Key<K>, usize>,
    id2item: HashMap<StateId, usize>,
    next_explicit: u64,
}

impl<S: SymStore, H: CandidateHit<S>, K: KeySpan> Database<S, H, K> {
    pub fn new(ctx: CtxRef, hit: H) -> Self {
        Database {
            ctx,
            hit,
            items: Vec::new(),
            state2item: HashMap::new(),
            id2item: HashMap::new(),
            next_explicit: 0,
        }
    }

    fn read_symbolic(&self, blob: &Blob) -> S {
        let mut store = S::new(self.ctx.clone());
        store.read(&mut BlobReader::new(blob.symbolic()));
        store
    }

    fn key(blob: &Blob) -> Key<K> {
        Key {
            blob: blob.clone(),
            _span: PhantomData,
        }
    }

    pub fn insert(&mut self, blob: Blob) -> StateId {
        self.insert_check(blob).1
    }

    /// Installs the blob; the flag is true when the state was not yet
    /// covered.
    pub fn insert_check(&mut self, blob: Blob) -> (bool, StateId) {
        let symbolic = self.read_symbolic(&blob);
        let existing = self.state2item.get(&Self::key(&blob)).copied();
        match existing {
            None => {
                self.next_explicit += 1;
                let explicit_id = self.next_explicit;
                let mut candidates = LinearCandidates { data: Vec::new() };
                let sym_id = candidates.insert(symbolic);
                let index = self.items.len();
                self.items.push(Item {
                    explicit_id,
                    blob: blob.clone(),
                    candidates,
                });
                let id = StateId {
                    exp: explicit_id,
                    sym: sym_id,
                };
                self.state2item.insert(Self::key(&blob), index);
                self.id2item.insert(id, index);
                (true, id)
            }
            Some(index) => {
                let item = &mut self.items[index];
                let (fresh, sym_id) = item.candidates.insert_check(symbolic, &self.hit);
                let id = StateId {
                    exp: item.explicit_id,
                    sym: sym_id,
                };
                if fresh {
                    self.id2item.insert(id, index);
                }
                (fresh, id)
            }
        }
    }

    /// Reconstructs the stored blob for `id`: the item's user and explicit
    /// bytes with the candidate's symbolic part re-serialised behind them.
    pub fn get_state(&self, id: StateId) -> Result<Blob, DatabaseError> {
        let index = *self
            .id2item
            .get(&id)
            .ok_or(DatabaseError::UnknownState(id))?;
        let item = &self.items[index];
        let candidate = item
            .candidates
            .get(id.sym)
            .ok_or(DatabaseError::UnknownState(id))?;

        let mut explicit = BlobWriter::new();
        explicit.write_bytes(item.blob.explicit());
        let mut symbolic = BlobWriter::new();
        candidate.write(&mut symbolic);
        Ok(Blob::assemble(item.blob.user(), explicit, symbolic))
    }

    /// Total number of stored states across all explicit keys.
    pub fn len(&self) -> usize {
        self.items.iter().map(|item| item.candidates.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::BlobWriter;
    use crate::context::Context;
    use crate::store::smt::SmtStore;
    use crate::store::{DataStore, ICmpOp, Value};

    fn blob_of(store: &SmtStore, explicit_bytes: &[u8], user: &[u8]) -> Blob {
        let mut e = BlobWriter::new();
        e.write_bytes(explicit_bytes);
        let mut s = BlobWriter::new();
        store.write(&mut s);
        Blob::assemble(user, e, s)
    }

    fn constrained(ctx: &CtxRef, bound: u64) -> SmtStore {
        let mut s = SmtStore::new(ctx.clone());
        s.add_segment(0, &[8]);
        s.implement_input(Value::var(0, 0), 8);
        s.prune(Value::var(0, 0), Value::constant(bound, 8), ICmpOp::Ult);
        s
    }

    #[test]
    fn distinct_explicit_keys_get_distinct_ids() {
        let ctx = Context::with_defaults();
        let mut db: Database<SmtStore, SubsetHit, ExplicitSpan> =
            Database::new(ctx.clone(), SubsetHit);
        let store = constrained(&ctx, 5);

        let (fresh_a, a) = db.insert_check(blob_of(&store, &[1], &[]));
        let (fresh_b, b) = db.insert_check(blob_of(&store, &[2], &[]));
        assert!(fresh_a && fresh_b);
        assert_ne!(a.exp, b.exp);
        assert_eq!(db.len(), 2);
    }

    #[test]
    fn subsumed_candidate_is_not_new() {
        let ctx = Context::with_defaults();
        let mut db: Database<SmtStore, SubsetHit, ExplicitSpan> =
            Database::new(ctx.clone(), SubsetHit);

        let wide = constrained(&ctx, 10);
        let (fresh, first) = db.insert_check(blob_of(&wide, &[7], &[]));
        assert!(fresh);

        // Tighter constraint, same explicit key: covered by the stored one.
        let mut narrow = wide.clone();
        narrow.prune(Value::var(0, 0), Value::constant(5, 8), ICmpOp::Ult);
        let (fresh, again) = db.insert_check(blob_of(&narrow, &[7], &[]));
        assert!(!fresh);
        assert_eq!(again, first);
        assert_eq!(db.len(), 1);
    }

    #[test]
    fn user_region_separates_keys_when_spanned() {
        let ctx = Context::with_defaults();
        let store = constrained(&ctx, 5);

        let mut plain: Database<SmtStore, SubsetHit, ExplicitSpan> =
            Database::new(ctx.clone(), SubsetHit);
        let (_, a) = plain.insert_check(blob_of(&store, &[9], &[0]));
        let (fresh, b) = plain.insert_check(blob_of(&store, &[9], &[1]));
        assert!(!fresh);
        assert_eq!(a, b);

        let mut keyed: Database<SmtStore, SubsetHit, ExplicitUserSpan> =
            Database::new(ctx.clone(), SubsetHit);
        let (_, a) = keyed.insert_check(blob_of(&store, &[9], &[0]));
        let (fresh, b) = keyed.insert_check(blob_of(&store, &[9], &[1]));
        assert!(fresh);
        assert_ne!(a, b);
    }

    #[test]
    fn get_state_round_trips_and_misses_are_reported() {
        let ctx = Context::with_defaults();
        let mut db: Database<SmtStore, SubsetHit, ExplicitSpan> =
            Database::new(ctx.clone(), SubsetHit);
        let store = constrained(&ctx, 9);
        let blob = blob_of(&store, &[3, 4], &[]);
        let id = db.insert(blob.clone());

        let back = db.get_state(id).unwrap();
        assert_eq!(back.explicit(), blob.explicit());

        let missing = StateId { exp: 99, sym: 1 };
        assert!(matches!(
            db.get_state(missing),
            Err(DatabaseError::UnknownState(_))
        ));
    }
}
