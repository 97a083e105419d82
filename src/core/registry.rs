//! Pattern registry: a digit trie shared by every call running a menu
//!
//! Nodes live in an arena and are addressed by index. Nodes are never removed
//! (unbinding only clears the terminal binding), so the node index held by a
//! [`DigitStream`] stays valid across concurrent `bind`/`unbind` calls. The
//! whole trie sits behind a reader-writer lock: `feed` only ever takes the
//! read side, structural changes take the write side.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, trace, warn};
use uuid::Uuid;

use super::binding::Binding;
use super::stream::{DigitStream, ROOT};
use crate::protocols::DigitAlphabet;
use crate::{Error, Result};

/// Outcome of feeding one digit into a stream.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedResult {
    /// A pattern completed; the stream is back at the root.
    Matched { binding: Arc<Binding>, digits: String },
    /// The digit was accepted but no pattern has completed yet.
    Pending,
    /// The digit does not start or continue any pattern; the stream is at the root.
    NoMatch,
}

impl FeedResult {
    pub fn is_match(&self) -> bool {
        matches!(self, FeedResult::Matched { .. })
    }
}

#[derive(Debug, Default)]
struct TrieNode {
    children: BTreeMap<char, usize>,
    binding: Option<Arc<Binding>>,
    /// Bindings at or below this node. Zero marks a branch left empty by
    /// `unbind`; matching treats it as if the edge did not exist.
    live: usize,
}

impl TrieNode {
    fn has_live_children(&self) -> bool {
        self.live > usize::from(self.binding.is_some())
    }
}

#[derive(Debug)]
struct Trie {
    nodes: Vec<TrieNode>,
    terminator: Option<char>,
    patterns: usize,
    max_len: usize,
}

impl Trie {
    fn new() -> Self {
        Self {
            nodes: vec![TrieNode::default()],
            terminator: None,
            patterns: 0,
            max_len: 0,
        }
    }

    fn child(&self, node: usize, digit: char) -> Option<usize> {
        self.nodes.get(node)?.children.get(&digit).copied()
    }

    fn live_child(&self, node: usize, digit: char) -> Option<usize> {
        self.child(node, digit).filter(|&next| self.nodes[next].live > 0)
    }

    /// Nodes from the root to the end of `sequence`, root included.
    fn path(&self, sequence: &str) -> Option<Vec<usize>> {
        let mut path = vec![ROOT];
        for digit in sequence.chars() {
            let next = self.child(*path.last()?, digit)?;
            path.push(next);
        }
        Some(path)
    }

    fn walk(&self, sequence: &str) -> Option<usize> {
        sequence
            .chars()
            .try_fold(ROOT, |node, digit| self.child(node, digit))
    }

    fn collect(&self, node: usize, prefix: &mut String, out: &mut Vec<(String, Arc<Binding>)>) {
        if let Some(binding) = &self.nodes[node].binding {
            out.push((prefix.clone(), Arc::clone(binding)));
        }
        for (&digit, &child) in &self.nodes[node].children {
            prefix.push(digit);
            self.collect(child, prefix, out);
            prefix.pop();
        }
    }
}

/// Trie mapping digit sequences to [`Binding`]s.
///
/// Binding a sequence that is already bound replaces the previous binding
/// (last write wins); `bind` hands the replaced binding back to the caller.
#[derive(Debug)]
pub struct PatternRegistry {
    id: Uuid,
    alphabet: DigitAlphabet,
    trie: RwLock<Trie>,
}

impl PatternRegistry {
    pub fn new() -> Self {
        Self::with_alphabet(DigitAlphabet::standard())
    }

    pub fn with_alphabet(alphabet: DigitAlphabet) -> Self {
        Self {
            id: Uuid::new_v4(),
            alphabet,
            trie: RwLock::new(Trie::new()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Trie> {
        self.trie.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Trie> {
        self.trie.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn alphabet(&self) -> &DigitAlphabet {
        &self.alphabet
    }

    /// Creates a fresh stream parked at this registry's root.
    pub fn stream(&self) -> DigitStream {
        DigitStream::new(self.id)
    }

    /// Binds `sequence` to `binding`, returning the binding it replaced.
    ///
    /// The sequence must be non-empty, drawn from the registry alphabet, and
    /// may only contain the terminator digit as its final symbol.
    pub fn bind(&self, sequence: &str, binding: Binding) -> Result<Option<Arc<Binding>>> {
        if sequence.is_empty() {
            return Err(Error::invalid_pattern("empty digit sequence"));
        }
        self.alphabet.validate(sequence)?;

        let mut trie = self.write();
        if let Some(terminator) = trie.terminator {
            let body = sequence.strip_suffix(terminator).unwrap_or(sequence);
            if body.contains(terminator) {
                return Err(Error::invalid_pattern(format!(
                    "terminator {:?} may only end a pattern, got {:?}",
                    terminator, sequence
                )));
            }
        }

        let mut node = ROOT;
        for digit in sequence.chars() {
            node = match trie.child(node, digit) {
                Some(next) => next,
                None => {
                    let next = trie.nodes.len();
                    trie.nodes.push(TrieNode::default());
                    trie.nodes[node].children.insert(digit, next);
                    next
                }
            };
        }

        let previous = trie.nodes[node].binding.replace(Arc::new(binding));
        match &previous {
            Some(_) => debug!("Pattern {} rebound, previous binding replaced", sequence),
            None => {
                for step in trie.path(sequence).unwrap_or_default() {
                    trie.nodes[step].live += 1;
                }
                trie.patterns += 1;
                trie.max_len = trie.max_len.max(sequence.chars().count());
                trace!("Pattern {} bound", sequence);
            }
        }
        Ok(previous)
    }

    /// Removes the binding for `sequence`.
    ///
    /// Nodes are left in place so stream cursors stay valid, but a branch
    /// with no bindings left no longer takes part in matching.
    pub fn unbind(&self, sequence: &str) -> Option<Arc<Binding>> {
        let mut trie = self.write();
        let path = trie.path(sequence)?;
        let node = *path.last()?;
        let removed = trie.nodes[node].binding.take();
        if removed.is_some() {
            for step in path {
                trie.nodes[step].live -= 1;
            }
            trie.patterns -= 1;
            trace!("Pattern {} unbound", sequence);
        }
        removed
    }

    /// Sets (or clears) the digit that forces an immediate match check.
    ///
    /// Rejected when the digit is outside the alphabet or an existing pattern
    /// already uses it anywhere but at its end.
    pub fn set_terminator(&self, terminator: Option<char>) -> Result<()> {
        let mut trie = self.write();
        if let Some(digit) = terminator {
            if !self.alphabet.contains(digit) {
                return Err(Error::invalid_pattern(format!(
                    "terminator {:?} is not a DTMF digit",
                    digit
                )));
            }
            let conflict = trie.nodes.iter().any(|node| {
                node.children
                    .get(&digit)
                    .map(|&child| trie.nodes[child].has_live_children())
                    .unwrap_or(false)
            });
            if conflict {
                return Err(Error::invalid_pattern(format!(
                    "terminator {:?} appears inside an existing pattern",
                    digit
                )));
            }
        }
        trie.terminator = terminator;
        Ok(())
    }

    pub fn terminator(&self) -> Option<char> {
        self.read().terminator
    }

    /// Advances `stream` by one digit.
    ///
    /// On a mismatch the stream returns to the root and the same digit is
    /// tried once more from there, so a dangling prefix of one pattern does
    /// not swallow the first digit of the next. A terminal node that still
    /// has children stays `Pending`; the caller settles it with [`expire`]
    /// once the inter-digit timeout runs out.
    ///
    /// [`expire`]: PatternRegistry::expire
    pub fn feed(&self, stream: &mut DigitStream, digit: char) -> FeedResult {
        if stream.registry_id() != self.id {
            warn!("Digit stream was created for another registry, resetting it");
            stream.attach(self.id);
        }
        stream.touch();

        let trie = self.read();

        if trie.terminator == Some(digit) {
            let current = stream.node();
            let binding = trie
                .live_child(current, digit)
                .and_then(|node| trie.nodes[node].binding.clone())
                .or_else(|| trie.nodes[current].binding.clone());
            let mut digits = stream.finish();
            digits.push(digit);
            return match binding {
                Some(binding) => {
                    trace!("Terminator matched {}", digits);
                    FeedResult::Matched { binding, digits }
                }
                None => {
                    trace!("Terminator after {} matched nothing", digits);
                    FeedResult::NoMatch
                }
            };
        }

        if !self.alphabet.contains(digit) {
            stream.reset();
            return FeedResult::NoMatch;
        }

        let next = match trie.live_child(stream.node(), digit) {
            Some(next) => next,
            None => {
                stream.reset();
                match trie.live_child(ROOT, digit) {
                    Some(next) => next,
                    None => return FeedResult::NoMatch,
                }
            }
        };
        stream.advance(next, digit);

        let node = &trie.nodes[next];
        match &node.binding {
            Some(binding) if !node.has_live_children() => {
                let binding = Arc::clone(binding);
                FeedResult::Matched {
                    binding,
                    digits: stream.finish(),
                }
            }
            _ => FeedResult::Pending,
        }
    }

    /// Settles a stream whose inter-digit timeout ran out.
    ///
    /// Returns the binding of the node the stream is parked on, if any, and
    /// always leaves the stream at the root.
    pub fn expire(&self, stream: &mut DigitStream) -> FeedResult {
        if stream.registry_id() != self.id || stream.is_at_root() {
            stream.attach(self.id);
            return FeedResult::NoMatch;
        }
        let binding = self.read().nodes[stream.node()].binding.clone();
        let digits = stream.finish();
        match binding {
            Some(binding) => FeedResult::Matched { binding, digits },
            None => FeedResult::NoMatch,
        }
    }

    /// Exact lookup, without touching any stream.
    pub fn lookup(&self, sequence: &str) -> Option<Arc<Binding>> {
        let trie = self.read();
        trie.walk(sequence)
            .and_then(|node| trie.nodes[node].binding.clone())
    }

    /// All bound sequences in lexical digit order.
    pub fn patterns(&self) -> Vec<(String, Arc<Binding>)> {
        let trie = self.read();
        let mut out = Vec::with_capacity(trie.patterns);
        trie.collect(ROOT, &mut String::new(), &mut out);
        out
    }

    pub fn len(&self) -> usize {
        self.read().patterns
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Length of the longest sequence ever bound.
    pub fn max_pattern_len(&self) -> usize {
        self.read().max_len
    }
}

impl Default for PatternRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::binding::ActionKind;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn sound(uri: &str) -> Binding {
        Binding::action(ActionKind::PlaySound, uri).unwrap()
    }

    fn feed_all(registry: &PatternRegistry, stream: &mut DigitStream, digits: &str) -> Vec<FeedResult> {
        digits.chars().map(|d| registry.feed(stream, d)).collect()
    }

    fn matched_arg(result: &FeedResult) -> Option<&str> {
        match result {
            FeedResult::Matched { binding, .. } => Some(binding.arg()),
            _ => None,
        }
    }

    #[test]
    fn test_prefixes_pending_then_match() {
        let registry = PatternRegistry::new();
        for pattern in ["123", "45", "7", "*90#", "6001"] {
            registry.bind(pattern, sound(pattern)).unwrap();
        }

        let mut stream = registry.stream();
        for pattern in ["123", "45", "7", "*90#", "6001"] {
            let results = feed_all(&registry, &mut stream, pattern);
            let (last, prefixes) = results.split_last().unwrap();
            assert!(prefixes.iter().all(|r| *r == FeedResult::Pending), "{}", pattern);
            assert_eq!(matched_arg(last), Some(pattern));
            assert!(stream.is_at_root());
        }
        assert_eq!(registry.len(), 5);
        assert_eq!(registry.max_pattern_len(), 4);
    }

    #[test]
    fn test_overlapping_patterns() {
        let registry = PatternRegistry::new();
        registry.bind("1", sound("one")).unwrap();
        registry.bind("12", sound("twelve")).unwrap();

        let mut stream = registry.stream();
        assert_eq!(registry.feed(&mut stream, '1'), FeedResult::Pending);
        let expired = registry.expire(&mut stream);
        assert_eq!(matched_arg(&expired), Some("one"));
        assert!(stream.is_at_root());

        assert_eq!(registry.feed(&mut stream, '1'), FeedResult::Pending);
        let result = registry.feed(&mut stream, '2');
        assert_eq!(matched_arg(&result), Some("twelve"));
    }

    #[test]
    fn test_mismatch_retries_from_root() {
        let registry = PatternRegistry::new();
        registry.bind("12", sound("twelve")).unwrap();
        registry.bind("34", sound("thirty-four")).unwrap();

        let mut stream = registry.stream();
        assert_eq!(registry.feed(&mut stream, '1'), FeedResult::Pending);
        // '3' does not continue "1", but it does start "34".
        assert_eq!(registry.feed(&mut stream, '3'), FeedResult::Pending);
        assert_eq!(stream.buffer(), "3");
        assert_eq!(matched_arg(&registry.feed(&mut stream, '4')), Some("thirty-four"));

        assert_eq!(registry.feed(&mut stream, '1'), FeedResult::Pending);
        assert_eq!(registry.feed(&mut stream, '9'), FeedResult::NoMatch);
        assert!(stream.is_at_root());
    }

    #[test]
    fn test_terminator() {
        let registry = PatternRegistry::new();
        registry.set_terminator(Some('#')).unwrap();
        registry.bind("123#", sound("account")).unwrap();
        registry.bind("55", sound("fifty-five")).unwrap();

        let mut stream = registry.stream();
        let results = feed_all(&registry, &mut stream, "123#");
        assert_eq!(matched_arg(&results[3]), Some("account"));

        let results = feed_all(&registry, &mut stream, "12#");
        assert_eq!(results[2], FeedResult::NoMatch);
        assert!(stream.is_at_root());

        // Terminator right after a complete pattern without its own '#' edge.
        registry.bind("9", sound("nine")).unwrap();
        registry.bind("98", sound("ninety-eight")).unwrap();
        assert_eq!(registry.feed(&mut stream, '9'), FeedResult::Pending);
        match registry.feed(&mut stream, '#') {
            FeedResult::Matched { binding, digits } => {
                assert_eq!(binding.arg(), "nine");
                assert_eq!(digits, "9#");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_terminator_placement_rules() {
        let registry = PatternRegistry::new();
        registry.set_terminator(Some('#')).unwrap();
        assert!(matches!(registry.bind("1#2", sound("x")), Err(Error::InvalidPattern(_))));
        assert!(registry.bind("#", sound("hash")).is_ok());

        let other = PatternRegistry::new();
        other.bind("*#1", sound("x")).unwrap();
        assert!(other.set_terminator(Some('#')).is_err());
        assert!(other.set_terminator(Some('*')).is_err());
        assert!(other.set_terminator(Some('x')).is_err());
        assert!(other.set_terminator(Some('0')).is_ok());
        assert_eq!(other.terminator(), Some('0'));
    }

    #[test]
    fn test_invalid_patterns() {
        let registry = PatternRegistry::new();
        assert!(matches!(registry.bind("", sound("x")), Err(Error::InvalidPattern(_))));
        assert!(matches!(registry.bind("12a", sound("x")), Err(Error::InvalidPattern(_))));

        let extended = PatternRegistry::with_alphabet(DigitAlphabet::with_extra("ABCD").unwrap());
        assert!(extended.bind("1A", sound("x")).is_ok());
    }

    #[test]
    fn test_rebind_last_write_wins() {
        let registry = PatternRegistry::new();
        assert!(registry.bind("42", sound("first")).unwrap().is_none());
        let previous = registry.bind("42", sound("second")).unwrap();
        assert_eq!(previous.unwrap().arg(), "first");
        assert_eq!(registry.lookup("42").unwrap().arg(), "second");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_unbind_keeps_interior_nodes() {
        let registry = PatternRegistry::new();
        registry.bind("12", sound("twelve")).unwrap();
        registry.bind("123", sound("one-two-three")).unwrap();

        assert_eq!(registry.unbind("123").unwrap().arg(), "one-two-three");
        assert!(registry.unbind("123").is_none());
        assert_eq!(registry.len(), 1);

        // With "123" gone, "12" is a leaf again and matches at once.
        let mut stream = registry.stream();
        assert_eq!(registry.feed(&mut stream, '1'), FeedResult::Pending);
        assert_eq!(matched_arg(&registry.feed(&mut stream, '2')), Some("twelve"));
        assert_eq!(registry.feed(&mut stream, '3'), FeedResult::NoMatch);
        assert!(stream.is_at_root());
    }

    #[test]
    fn test_emptied_branch_retries_from_root() {
        let registry = PatternRegistry::new();
        registry.bind("12", sound("twelve")).unwrap();
        registry.bind("3", sound("three")).unwrap();
        registry.bind("13", sound("thirteen")).unwrap();
        registry.unbind("13").unwrap();

        let mut stream = registry.stream();
        assert_eq!(registry.feed(&mut stream, '1'), FeedResult::Pending);
        assert_eq!(matched_arg(&registry.feed(&mut stream, '3')), Some("three"));

        registry.unbind("12").unwrap();
        assert_eq!(registry.feed(&mut stream, '1'), FeedResult::NoMatch);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_emptied_branch_frees_terminator() {
        let registry = PatternRegistry::new();
        registry.bind("1#2", sound("x")).unwrap();
        assert!(registry.set_terminator(Some('#')).is_err());
        registry.unbind("1#2").unwrap();
        assert!(registry.set_terminator(Some('#')).is_ok());
    }

    #[test]
    fn test_expire_without_binding() {
        let registry = PatternRegistry::new();
        registry.bind("77", sound("x")).unwrap();
        let mut stream = registry.stream();
        assert_eq!(registry.expire(&mut stream), FeedResult::NoMatch);
        registry.feed(&mut stream, '7');
        assert_eq!(registry.expire(&mut stream), FeedResult::NoMatch);
        assert!(stream.buffer().is_empty());
    }

    #[test]
    fn test_foreign_stream_is_reset() {
        let a = PatternRegistry::new();
        let b = PatternRegistry::new();
        a.bind("11", sound("a")).unwrap();
        b.bind("2", sound("b")).unwrap();

        let mut stream = a.stream();
        assert_eq!(a.feed(&mut stream, '1'), FeedResult::Pending);
        assert_eq!(matched_arg(&b.feed(&mut stream, '2')), Some("b"));
    }

    #[test]
    fn test_patterns_listing() {
        let registry = PatternRegistry::new();
        registry.bind("2", sound("b")).unwrap();
        registry.bind("1", sound("a")).unwrap();
        registry.bind("10", sound("c")).unwrap();
        let listed: Vec<String> = registry.patterns().into_iter().map(|(p, _)| p).collect();
        assert_eq!(listed, vec!["1", "10", "2"]);
    }

    #[test]
    fn test_concurrent_bind_and_feed() {
        let registry = PatternRegistry::new();
        let mut base = Vec::new();
        for first in '1'..='9' {
            for second in '0'..='9' {
                let pattern = format!("{}{}", first, second);
                registry.bind(&pattern, sound(&pattern)).unwrap();
                base.push(pattern);
            }
        }

        std::thread::scope(|scope| {
            for writer in 0..2u64 {
                let registry = &registry;
                scope.spawn(move || {
                    let mut rng = StdRng::seed_from_u64(writer);
                    for _ in 0..2_000 {
                        let len = rng.gen_range(1..=4);
                        let tail: String = (0..len)
                            .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
                            .collect();
                        let pattern = format!("*{}", tail);
                        if rng.gen_bool(0.6) {
                            registry.bind(&pattern, sound(&pattern)).unwrap();
                        } else {
                            registry.unbind(&pattern);
                        }
                    }
                });
            }

            for reader in 0..6u64 {
                let registry = &registry;
                let base = &base;
                scope.spawn(move || {
                    let mut rng = StdRng::seed_from_u64(100 + reader);
                    let mut stream = registry.stream();
                    for _ in 0..5_000 {
                        if rng.gen_bool(0.3) {
                            let noise: String = (0..rng.gen_range(1..=5))
                                .map(|_| if rng.gen_bool(0.5) { '*' } else { char::from(b'0' + rng.gen_range(0..10u8)) })
                                .collect();
                            for digit in noise.chars() {
                                if let FeedResult::Matched { binding, digits } = registry.feed(&mut stream, digit) {
                                    assert_eq!(binding.arg(), digits, "phantom match");
                                }
                            }
                        }

                        stream.reset();
                        let pattern = &base[rng.gen_range(0..base.len())];
                        let results = feed_all(registry, &mut stream, pattern);
                        assert_eq!(results[0], FeedResult::Pending);
                        match &results[1] {
                            FeedResult::Matched { binding, digits } => {
                                assert_eq!(binding.arg(), pattern.as_str());
                                assert_eq!(digits, pattern);
                            }
                            other => panic!("missed match for {}: {:?}", pattern, other),
                        }
                    }
                });
            }
        });

        assert!(registry.len() >= base.len());
    }
}
