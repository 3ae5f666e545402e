//! Clause allocator.
use std::mem::transmute;
use std::slice;

use marrow_formula::lit::{Lit, LitIdx};

use super::header::HEADER_LEN;
use super::{Clause, ClauseHeader};

/// Integer type used to store offsets into [`ClauseAlloc`]'s memory.
type ClauseOffset = u32;

/// Bump allocator for clause storage.
///
/// Clauses are allocated from a single continuous buffer. Clauses cannot be freed individually;
/// deleting a clause marks it and accounts its words as garbage. To reclaim the space a garbage
/// collection copies the remaining clauses into a helper allocator and the buffers are swapped.
///
/// Each stored clause is a length-prefixed record: the header words followed by the literals
/// inline, and for learned clauses one extra word holding the activity. Offset 0 is never handed
/// out, so a zero [`ClauseRef`] can serve as a null value elsewhere.
///
/// The allocator carries an upper `limit` on its buffer size. The CP propagator framework lowers
/// the limit whenever a propagator id is handed out, which guarantees that clause references and
/// propagator ids never collide. Allocating past the limit means an internal bound was exceeded
/// and is treated as fatal.
pub struct ClauseAlloc {
    buffer: Vec<LitIdx>,
    limit: u64,
    garbage_words: usize,
}

impl Default for ClauseAlloc {
    fn default() -> ClauseAlloc {
        ClauseAlloc {
            // offset 0 is reserved as null
            buffer: vec![0],
            limit: ClauseOffset::max_value() as u64,
            garbage_words: 0,
        }
    }
}

impl ClauseAlloc {
    /// Create an empty clause allocator.
    pub fn new() -> ClauseAlloc {
        ClauseAlloc::default()
    }

    /// Create a clause allocator with preallocated capacity.
    pub fn with_capacity(capacity: usize) -> ClauseAlloc {
        let mut alloc = ClauseAlloc::default();
        alloc.buffer.reserve(capacity);
        alloc
    }

    /// Allocate space for and add a new clause.
    ///
    /// Clauses have a minimal size of 2, as unit clauses are stored as root-level trail entries.
    /// The size of the header will be set to the size of the given slice. The returned
    /// [`ClauseRef`] can be used to access the new clause.
    pub fn add_clause(&mut self, mut header: ClauseHeader, lits: &[Lit]) -> ClauseRef {
        let offset = self.buffer.len();

        assert!(
            lits.len() >= 2,
            "ClauseAlloc can only store binary and larger clauses"
        );

        let words = HEADER_LEN + lits.len() + header.learned() as usize;

        assert!(
            offset as u64 + words as u64 <= self.limit,
            "clause arena exceeded its size limit"
        );

        header.set_len(lits.len());

        self.buffer.extend_from_slice(&header.data);

        let lit_idx_slice = unsafe {
            // This is safe as Lit and LitIdx have the same representation
            slice::from_raw_parts(lits.as_ptr() as *const LitIdx, lits.len())
        };

        self.buffer.extend_from_slice(lit_idx_slice);

        if header.learned() {
            self.buffer.push(0f32.to_bits());
        }

        ClauseRef {
            offset: offset as ClauseOffset,
        }
    }

    /// Copy a clause from another allocator, including its activity.
    ///
    /// The relocation flag of the copy is cleared.
    pub fn add_clause_from(&mut self, other: &ClauseAlloc, cref: ClauseRef) -> ClauseRef {
        let clause = other.clause(cref);
        let mut header = clause.header().clone();
        header.set_relocated(false);
        let learned = header.learned();
        let new_cref = self.add_clause(header, clause.lits());
        if learned {
            self.set_activity(new_cref, other.activity(cref));
        }
        new_cref
    }

    /// Mark a clause as deleted and account its space as garbage.
    pub fn delete_clause(&mut self, cref: ClauseRef) {
        let header = self.header_mut(cref);
        debug_assert!(!header.deleted(), "delete_clause for already deleted clause");
        header.set_deleted(true);
        let words = HEADER_LEN + header.len() + header.learned() as usize;
        self.garbage_words += words;
    }

    /// Access the header of a clause.
    pub fn header(&self, cref: ClauseRef) -> &ClauseHeader {
        let offset = cref.offset as usize;
        assert!(
            offset + HEADER_LEN <= self.buffer.len(),
            "ClauseRef out of bounds"
        );
        unsafe {
            let header_ptr = self.buffer.as_ptr().add(offset) as *const ClauseHeader;
            &*header_ptr
        }
    }

    /// Mutate the header of a clause.
    pub fn header_mut(&mut self, cref: ClauseRef) -> &mut ClauseHeader {
        let offset = cref.offset as usize;
        assert!(
            offset + HEADER_LEN <= self.buffer.len(),
            "ClauseRef out of bounds"
        );
        unsafe {
            let header_ptr = self.buffer.as_mut_ptr().add(offset) as *mut ClauseHeader;
            &mut *header_ptr
        }
    }

    /// Access a clause.
    pub fn clause(&self, cref: ClauseRef) -> &Clause {
        let len = self.header(cref).len();
        let offset = cref.offset as usize;
        let end = offset + HEADER_LEN + len;
        assert!(end <= self.buffer.len(), "ClauseRef out of bounds");
        unsafe {
            transmute::<&[LitIdx], &Clause>(slice::from_raw_parts(
                self.buffer.as_ptr().add(offset),
                len + HEADER_LEN,
            ))
        }
    }

    /// Mutate a clause.
    pub fn clause_mut(&mut self, cref: ClauseRef) -> &mut Clause {
        let len = self.header(cref).len();
        let offset = cref.offset as usize;
        let end = offset + HEADER_LEN + len;
        assert!(end <= self.buffer.len(), "ClauseRef out of bounds");
        unsafe {
            transmute::<&mut [LitIdx], &mut Clause>(slice::from_raw_parts_mut(
                self.buffer.as_mut_ptr().add(offset),
                len + HEADER_LEN,
            ))
        }
    }

    /// Activity of a learned clause.
    pub fn activity(&self, cref: ClauseRef) -> f32 {
        let header = self.header(cref);
        debug_assert!(header.learned());
        let slot = cref.offset as usize + HEADER_LEN + header.len();
        f32::from_bits(self.buffer[slot])
    }

    /// Set the activity of a learned clause.
    pub fn set_activity(&mut self, cref: ClauseRef, activity: f32) {
        let header = self.header(cref);
        debug_assert!(header.learned());
        let slot = cref.offset as usize + HEADER_LEN + header.len();
        self.buffer[slot] = activity.to_bits();
    }

    /// Shrink a clause in place to a prefix of its literals.
    ///
    /// For learned clauses the activity is moved next to the new last literal. The freed words
    /// are not reusable until the next garbage collection, but are not counted as garbage either
    /// as they are unreachable dead space within the record.
    pub fn shrink_clause(&mut self, cref: ClauseRef, new_len: usize) {
        let header = self.header(cref);
        let old_len = header.len();
        debug_assert!(new_len >= 2 && new_len <= old_len);
        if new_len == old_len {
            return;
        }
        let learned = header.learned();
        let activity = if learned { self.activity(cref) } else { 0.0 };
        self.header_mut(cref).set_len(new_len);
        if learned {
            self.set_activity(cref, activity);
        }
    }

    /// Store the relocation target of a clause in its first literal slot.
    ///
    /// Used by garbage collection: the clause must already have been copied elsewhere and is
    /// invalid from this point on, apart from its header and the stored target.
    pub fn set_relocation(&mut self, cref: ClauseRef, target: ClauseRef) {
        let slot = cref.offset as usize + HEADER_LEN;
        self.buffer[slot] = target.offset;
        self.header_mut(cref).set_relocated(true);
    }

    /// Read back a relocation target stored by [`set_relocation`](ClauseAlloc::set_relocation).
    pub fn relocation(&self, cref: ClauseRef) -> ClauseRef {
        debug_assert!(self.header(cref).relocated());
        let slot = cref.offset as usize + HEADER_LEN;
        ClauseRef {
            offset: self.buffer[slot],
        }
    }

    /// Lower the allocation limit.
    ///
    /// Clause references handed out stay below the limit, keeping them disjoint from CP
    /// propagator ids.
    pub fn set_limit(&mut self, limit: u64) {
        debug_assert!(self.buffer.len() as u64 <= limit);
        self.limit = limit;
    }

    /// The current allocation limit.
    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Current buffer size in multiples of [`LitIdx`].
    pub fn buffer_size(&self) -> usize {
        self.buffer.len()
    }

    /// Number of words occupied by deleted clauses.
    pub fn garbage_words(&self) -> usize {
        self.garbage_words
    }

    /// Drop all clauses, keeping the limit.
    pub fn clear(&mut self) {
        self.buffer.truncate(1);
        self.garbage_words = 0;
    }
}

/// Compact reference to a clause.
///
/// Used with [`ClauseAlloc`] to access the clause.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug)]
pub struct ClauseRef {
    offset: ClauseOffset,
}

impl ClauseRef {
    /// The raw arena offset of this reference.
    pub fn code(self) -> u32 {
        self.offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use marrow_formula::{cnf::strategy::*, CnfFormula};

    use proptest::*;

    proptest! {
        #[test]
        fn roundtrip_from_cnf_formula(input in cnf_formula(1..100usize, 0..1000, 2..30)) {

            let mut clause_alloc = ClauseAlloc::new();
            let mut clause_refs = vec![];

            for clause_lits in input.iter() {
                let header = ClauseHeader::new();
                clause_refs.push(clause_alloc.add_clause(header, clause_lits));
            }

            let mut recovered = CnfFormula::new();

            for cref in clause_refs {
                let clause = clause_alloc.clause(cref);
                prop_assert_eq!(clause.header().len(), clause.lits().len());
                recovered.add_clause(clause.lits());
            }

            // Ignore difference caused by unused vars
            recovered.set_var_count(input.var_count());

            prop_assert_eq!(input, recovered);
        }
    }

    #[test]
    fn learned_clause_activity() {
        let mut alloc = ClauseAlloc::new();

        let mut header = ClauseHeader::new();
        header.set_learned(true);
        let lits = [Lit::from_dimacs(1), Lit::from_dimacs(-2), Lit::from_dimacs(3)];
        let cref = alloc.add_clause(header, &lits);

        assert_eq!(alloc.activity(cref), 0.0);
        alloc.set_activity(cref, 2.5);
        assert_eq!(alloc.activity(cref), 2.5);
        assert_eq!(alloc.clause(cref).lits(), &lits);

        alloc.shrink_clause(cref, 2);
        assert_eq!(alloc.clause(cref).lits(), &lits[..2]);
        assert_eq!(alloc.activity(cref), 2.5);
    }

    #[test]
    fn garbage_accounting() {
        let mut alloc = ClauseAlloc::new();
        let lits = [Lit::from_dimacs(1), Lit::from_dimacs(2)];

        let cref = alloc.add_clause(ClauseHeader::new(), &lits);
        assert_eq!(alloc.garbage_words(), 0);

        alloc.delete_clause(cref);
        assert!(alloc.header(cref).deleted());
        assert_eq!(alloc.garbage_words(), HEADER_LEN + 2);
    }

    #[test]
    #[should_panic(expected = "size limit")]
    fn limit_is_enforced() {
        let mut alloc = ClauseAlloc::new();
        alloc.set_limit(4);
        let lits = [Lit::from_dimacs(1), Lit::from_dimacs(2), Lit::from_dimacs(3)];
        alloc.add_clause(ClauseHeader::new(), &lits);
    }
}
