//! Recursive-descent construction of a plan from a POSIX regular
//! expression, basic or extended.
//!
//! Constructs the planner cannot reason about — anchors, backreferences,
//! named classes, over-wide bracket expressions — become ANY nodes: a safe
//! over-approximation that pruning later drops from trigram extraction.
//! Quantifier subgraphs are acyclic: a starred atom is unrolled into
//! zero/one/two-occurrence branches instead of a loop edge.

use ahash::AHashMap;

use super::{NodeId, NodeVal, Plan};
use crate::error::{Error, Result};

/// Bracket expressions wider than this collapse to ANY, keeping window
/// enumeration bounded. Negated classes almost always exceed it.
const CLASS_FAN_OUT_CAP: usize = 16;

/// A subgraph under construction: its entry node and the node whose
/// successors are still dangling.
#[derive(Clone, Copy)]
struct Frag {
    entry: NodeId,
    exit: NodeId,
}

/// Parse `pattern` into `plan`, linking the result between the plan's root
/// and end nodes.
pub(super) fn build(plan: &mut Plan, pattern: &[u8], extended: bool) -> Result<()> {
    let frag = {
        let mut parser = Parser {
            plan,
            input: pattern,
            pos: 0,
            extended,
        };
        let frag = parser.alternation()?;
        if parser.pos != pattern.len() {
            return Err(malformed(pattern, "unbalanced parenthesis"));
        }
        frag
    };
    let root = plan.root();
    let end = plan.end();
    plan.link(root, frag.entry);
    plan.link(frag.exit, end);
    Ok(())
}

enum Quant {
    Optional,
    Star,
    Plus,
    Interval,
}

struct Parser<'a, 'p> {
    plan: &'p mut Plan,
    input: &'a [u8],
    pos: usize,
    extended: bool,
}

impl Parser<'_, '_> {
    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.input.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        Some(b)
    }

    fn alternation(&mut self) -> Result<Frag> {
        let mut branches = vec![self.concat()?];
        while self.eat_bar() {
            branches.push(self.concat()?);
        }
        if branches.len() == 1 {
            return Ok(branches[0]);
        }
        let split = self.plan.add(NodeVal::Split);
        let join = self.plan.add(NodeVal::Empty);
        for frag in branches {
            self.plan.link(split, frag.entry);
            self.plan.link(frag.exit, join);
        }
        Ok(Frag {
            entry: split,
            exit: join,
        })
    }

    fn eat_bar(&mut self) -> bool {
        if self.extended {
            if self.peek() == Some(b'|') {
                self.pos += 1;
                return true;
            }
        } else if self.peek() == Some(b'\\') && self.peek_at(1) == Some(b'|') {
            self.pos += 2;
            return true;
        }
        false
    }

    fn at_branch_end(&self) -> bool {
        match self.peek() {
            None => true,
            Some(b'|') | Some(b')') if self.extended => true,
            Some(b'\\') if !self.extended => {
                matches!(self.peek_at(1), Some(b'|') | Some(b')'))
            }
            _ => false,
        }
    }

    fn concat(&mut self) -> Result<Frag> {
        let mut acc: Option<Frag> = None;
        while !self.at_branch_end() {
            let frag = self.repeat()?;
            acc = Some(match acc {
                None => frag,
                Some(prev) => {
                    self.plan.link(prev.exit, frag.entry);
                    Frag {
                        entry: prev.entry,
                        exit: frag.exit,
                    }
                }
            });
        }
        Ok(match acc {
            Some(frag) => frag,
            None => {
                let e = self.plan.add(NodeVal::Empty);
                Frag { entry: e, exit: e }
            }
        })
    }

    fn repeat(&mut self) -> Result<Frag> {
        let mut frag = self.atom()?;
        while let Some(quant) = self.quantifier() {
            frag = match quant {
                Quant::Optional => self.optional(frag),
                // Intervals over-approximate as stars: more alternatives
                // can only widen the candidate set.
                Quant::Star | Quant::Interval => self.star(frag),
                Quant::Plus => {
                    let tail = self.clone_fragment(frag);
                    let starred = self.star(tail);
                    self.plan.link(frag.exit, starred.entry);
                    Frag {
                        entry: frag.entry,
                        exit: starred.exit,
                    }
                }
            };
        }
        Ok(frag)
    }

    fn quantifier(&mut self) -> Option<Quant> {
        match self.peek()? {
            b'*' => {
                self.pos += 1;
                Some(Quant::Star)
            }
            b'+' if self.extended => {
                self.pos += 1;
                Some(Quant::Plus)
            }
            b'?' if self.extended => {
                self.pos += 1;
                Some(Quant::Optional)
            }
            b'{' if self.extended => self.interval(1),
            b'\\' if !self.extended => match self.peek_at(1) {
                Some(b'+') => {
                    self.pos += 2;
                    Some(Quant::Plus)
                }
                Some(b'?') => {
                    self.pos += 2;
                    Some(Quant::Optional)
                }
                Some(b'{') => self.interval(2),
                _ => None,
            },
            _ => None,
        }
    }

    /// Try to consume an interval expression; on anything that is not a
    /// well-delimited `{digits,digits}` the brace stays literal.
    fn interval(&mut self, skip: usize) -> Option<Quant> {
        let mut i = self.pos + skip;
        while i < self.input.len() {
            match self.input[i] {
                b'}' if self.extended => {
                    self.pos = i + 1;
                    return Some(Quant::Interval);
                }
                b'\\' if !self.extended && self.input.get(i + 1) == Some(&b'}') => {
                    self.pos = i + 2;
                    return Some(Quant::Interval);
                }
                c if c.is_ascii_digit() || c == b',' => i += 1,
                _ => return None,
            }
        }
        None
    }

    fn atom(&mut self) -> Result<Frag> {
        let Some(b) = self.bump() else {
            return Err(malformed(self.input, "unexpected end of pattern"));
        };
        match b {
            b'.' => Ok(self.leaf(NodeVal::Any)),
            // Anchors consume no text but constrain position; treating them
            // as unknown bytes keeps the filter a superset of the matches.
            b'^' | b'$' => Ok(self.leaf(NodeVal::Any)),
            b'[' => self.class(),
            b'(' if self.extended => self.group(false),
            b'\\' => match self.bump() {
                None => Err(malformed(self.input, "dangling backslash")),
                Some(b'(') if !self.extended => self.group(true),
                Some(d) if d.is_ascii_digit() => Ok(self.leaf(NodeVal::Any)),
                Some(other) => Ok(self.leaf(NodeVal::Byte(other))),
            },
            other => Ok(self.leaf(NodeVal::Byte(other))),
        }
    }

    fn group(&mut self, basic: bool) -> Result<Frag> {
        let frag = self.alternation()?;
        if basic {
            if self.peek() == Some(b'\\') && self.peek_at(1) == Some(b')') {
                self.pos += 2;
                return Ok(frag);
            }
        } else if self.peek() == Some(b')') {
            self.pos += 1;
            return Ok(frag);
        }
        Err(malformed(self.input, "unterminated group"))
    }

    fn class(&mut self) -> Result<Frag> {
        let negated = if self.peek() == Some(b'^') {
            self.pos += 1;
            true
        } else {
            false
        };

        let mut members: Vec<u8> = Vec::new();
        let mut wide = false;
        // A bracket immediately after the opener is a literal member, not
        // the closer.
        let mut first = true;

        loop {
            let Some(c) = self.bump() else {
                return Err(malformed(self.input, "unterminated bracket expression"));
            };
            if c == b']' && !first {
                break;
            }
            first = false;
            match c {
                b'[' if self.peek() == Some(b':') => {
                    // Named classes ([:alpha:] and friends) expand too wide
                    // to enumerate.
                    wide = true;
                    loop {
                        match self.bump() {
                            None => {
                                return Err(malformed(
                                    self.input,
                                    "unterminated character class name",
                                ))
                            }
                            Some(b':') if self.peek() == Some(b']') => {
                                self.pos += 1;
                                break;
                            }
                            Some(_) => {}
                        }
                    }
                }
                c => {
                    if self.peek() == Some(b'-')
                        && self.peek_at(1).is_some()
                        && self.peek_at(1) != Some(b']')
                    {
                        self.pos += 1;
                        match self.bump() {
                            Some(hi) if hi >= c => {
                                members.extend(c..=hi);
                            }
                            _ => return Err(malformed(self.input, "invalid range endpoint")),
                        }
                    } else {
                        members.push(c);
                    }
                }
            }
        }

        if negated {
            members = (0u8..=255).filter(|b| !members.contains(b)).collect();
        }
        members.sort_unstable();
        members.dedup();

        if wide || members.is_empty() || members.len() > CLASS_FAN_OUT_CAP {
            return Ok(self.leaf(NodeVal::Any));
        }
        if members.len() == 1 {
            return Ok(self.leaf(NodeVal::Byte(members[0])));
        }

        let split = self.plan.add(NodeVal::Split);
        let join = self.plan.add(NodeVal::Empty);
        for &m in &members {
            let node = self.plan.add(NodeVal::Byte(m));
            self.plan.link(split, node);
            self.plan.link(node, join);
        }
        Ok(Frag {
            entry: split,
            exit: join,
        })
    }

    fn leaf(&mut self, val: NodeVal) -> Frag {
        let node = self.plan.add(val);
        Frag {
            entry: node,
            exit: node,
        }
    }

    /// `atom?`: a split between the atom and an epsilon path, converging on
    /// a shared join.
    fn optional(&mut self, frag: Frag) -> Frag {
        let split = self.plan.add(NodeVal::Split);
        let join = self.plan.add(NodeVal::Empty);
        self.plan.link(split, frag.entry);
        self.plan.link(split, join);
        self.plan.link(frag.exit, join);
        Frag {
            entry: split,
            exit: join,
        }
    }

    /// `atom*`: branches for zero, one, and two occurrences converging on a
    /// shared join, in place of a loop edge. Two unrollings suffice: for a
    /// string with more repetitions, its last two occurrences plus the
    /// continuation spell out the two-copy branch exactly, so every window
    /// that branch enumerates is present in the string.
    fn star(&mut self, frag: Frag) -> Frag {
        let repeat = self.clone_fragment(frag);
        let split = self.plan.add(NodeVal::Split);
        let inner = self.plan.add(NodeVal::Split);
        let join = self.plan.add(NodeVal::Empty);

        self.plan.link(split, frag.entry);
        self.plan.link(split, join);
        self.plan.link(frag.exit, inner);
        self.plan.link(inner, repeat.entry);
        self.plan.link(inner, join);
        self.plan.link(repeat.exit, join);

        Frag {
            entry: split,
            exit: join,
        }
    }

    /// Deep-copy a fragment's subgraph. The shared end node is never
    /// duplicated; edges into it stay shared.
    fn clone_fragment(&mut self, frag: Frag) -> Frag {
        let mut map: AHashMap<NodeId, NodeId> = AHashMap::new();
        let entry = self.copy_node(frag.entry, &mut map);
        let exit = map[&frag.exit];
        Frag { entry, exit }
    }

    fn copy_node(&mut self, id: NodeId, map: &mut AHashMap<NodeId, NodeId>) -> NodeId {
        if let Some(&copied) = map.get(&id) {
            return copied;
        }
        if self.plan.val(id) == NodeVal::End {
            map.insert(id, id);
            return id;
        }
        let new = self.plan.add(self.plan.val(id));
        map.insert(id, new);
        let successors = self.plan.successors(id).to_vec();
        for s in successors {
            let copied = self.copy_node(s, map);
            self.plan.link(new, copied);
        }
        new
    }
}

fn malformed(pattern: &[u8], reason: &str) -> Error {
    Error::MalformedRegex {
        pattern: String::from_utf8_lossy(pattern).into_owned(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::super::Plan;
    use crate::error::Error;

    fn parse(pattern: &str, extended: bool) -> Result<Plan, Error> {
        Plan::parse_regex(pattern.as_bytes(), extended, true)
    }

    #[test]
    fn literals_parse() {
        parse("abc", true).unwrap();
        parse("abc", false).unwrap();
    }

    #[test]
    fn unterminated_group_rejected() {
        assert!(matches!(
            parse("(ab", true),
            Err(Error::MalformedRegex { .. })
        ));
        assert!(matches!(
            parse(r"\(ab", false),
            Err(Error::MalformedRegex { .. })
        ));
    }

    #[test]
    fn unbalanced_close_rejected() {
        assert!(matches!(
            parse("ab)", true),
            Err(Error::MalformedRegex { .. })
        ));
    }

    #[test]
    fn unterminated_class_rejected() {
        assert!(matches!(
            parse("a[bc", true),
            Err(Error::MalformedRegex { .. })
        ));
    }

    #[test]
    fn inverted_range_rejected() {
        assert!(matches!(
            parse("[z-a]", true),
            Err(Error::MalformedRegex { .. })
        ));
    }

    #[test]
    fn dangling_backslash_rejected() {
        assert!(matches!(
            parse("ab\\", true),
            Err(Error::MalformedRegex { .. })
        ));
    }

    #[test]
    fn bre_plain_metas_are_literal() {
        // `+` and parentheses are ordinary characters in a basic regex.
        parse("a+(b)", false).unwrap();
    }

    #[test]
    fn intervals_accepted_both_flavors() {
        parse("a{2,3}", true).unwrap();
        parse(r"a\{2,3\}", false).unwrap();
    }

    #[test]
    fn malformed_interval_is_a_literal_brace() {
        // `{x` is not an interval; the brace falls through as a literal.
        parse("a{x", true).unwrap();
    }

    #[test]
    fn named_class_overapproximates() {
        parse("[[:alpha:]]x", true).unwrap();
    }

    #[test]
    fn nested_quantified_groups() {
        parse("(ab+)*c", true).unwrap();
        parse("(a|b)?(c|d)+", true).unwrap();
    }
}
