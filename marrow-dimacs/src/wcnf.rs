//! Weighted CNF (WCNF) parsing and writing.
//!
//! The header is `p wcnf <num-vars> <num-clauses> <top-weight>`. Every clause line starts with a
//! positive integer weight; clauses at the top weight are hard, smaller weights mark soft
//! clauses.

use std::io;

use marrow_formula::{Lit, Var};

use anyhow::Error;

use crate::ParserError;

/// A weighted formula as found in WCNF files.
#[derive(Default, Debug)]
pub struct WcnfFormula {
    var_count: usize,
    top: u64,
    weights: Vec<u64>,
    literals: Vec<Lit>,
    clause_ends: Vec<usize>,
}

impl WcnfFormula {
    /// Create an empty weighted formula with the given hard-clause weight.
    pub fn new(top: u64) -> WcnfFormula {
        WcnfFormula {
            top,
            ..WcnfFormula::default()
        }
    }

    /// The weight identifying hard clauses.
    pub fn top_weight(&self) -> u64 {
        self.top
    }

    /// Number of variables in the formula.
    pub fn var_count(&self) -> usize {
        self.var_count
    }

    /// Increase the number of variables in the formula.
    pub fn set_var_count(&mut self, count: usize) {
        self.var_count = self.var_count.max(count);
    }

    /// Number of clauses in the formula.
    pub fn len(&self) -> usize {
        self.clause_ends.len()
    }

    /// Whether the formula contains no clauses.
    pub fn is_empty(&self) -> bool {
        self.clause_ends.is_empty()
    }

    /// Append a weighted clause.
    pub fn add_clause(&mut self, weight: u64, lits: &[Lit]) {
        for &lit in lits {
            self.var_count = self.var_count.max(lit.index() + 1);
        }
        self.weights.push(weight);
        self.literals.extend_from_slice(lits);
        self.clause_ends.push(self.literals.len());
    }

    /// Whether the clause at the given index is hard.
    pub fn is_hard(&self, index: usize) -> bool {
        self.weights[index] >= self.top
    }

    /// Iterator over `(weight, clause)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (u64, &[Lit])> {
        let literals = &self.literals;
        let ends = &self.clause_ends;
        self.weights.iter().enumerate().map(move |(i, &weight)| {
            let begin = if i == 0 { 0 } else { ends[i - 1] };
            (weight, &literals[begin..ends[i]])
        })
    }
}

/// Parser for WCNF files.
///
/// Unlike the CNF parser this reads the whole input in one call; WCNF instances are consumed by
/// the optimization front-end which needs the complete objective anyway.
pub struct WcnfParser;

impl WcnfParser {
    /// Parse a complete WCNF input.
    pub fn parse(input: impl io::Read) -> Result<WcnfFormula, Error> {
        use io::BufRead;

        let mut header: Option<(usize, usize, u64)> = None;
        let mut formula = WcnfFormula::default();
        let mut clause: Vec<Lit> = vec![];

        let reader = io::BufReader::new(input);
        for (line_index, line) in reader.lines().enumerate() {
            let line = line?;
            let line_number = line_index + 1;
            let trimmed = line.trim();

            if trimmed.is_empty() || trimmed.starts_with('c') {
                continue;
            }

            if trimmed.starts_with('p') {
                if header.is_some() {
                    return Err(ParserError::UnexpectedInput {
                        line: line_number,
                        unexpected: 'p',
                    }
                    .into());
                }
                header = Some(parse_wcnf_header(trimmed, line_number)?);
                let (var_count, _, top) = header.unwrap();
                formula.top = top;
                formula.set_var_count(var_count);
                continue;
            }

            if header.is_none() {
                return Err(ParserError::MissingWcnfHeader.into());
            }

            let mut tokens = trimmed.split_whitespace();

            let weight: u64 = tokens
                .next()
                .and_then(|token| token.parse().ok())
                .ok_or(ParserError::InvalidWeight { line: line_number })?;

            clause.clear();
            let mut terminated = false;
            for token in tokens {
                let number: isize = token.parse().map_err(|_| ParserError::UnexpectedInput {
                    line: line_number,
                    unexpected: token.chars().next().unwrap_or(' '),
                })?;
                if number == 0 {
                    terminated = true;
                    break;
                }
                if number.unsigned_abs() > Var::max_count() {
                    return Err(ParserError::LiteralTooLarge {
                        line: line_number,
                        index: number.unsigned_abs() / 10,
                        final_digit: number.unsigned_abs() % 10,
                    }
                    .into());
                }
                clause.push(Lit::from_dimacs(number));
            }
            if !terminated {
                return Err(ParserError::UnterminatedClause { line: line_number }.into());
            }
            formula.add_clause(weight, &clause);
        }

        let (header_vars, header_clauses, _) = header.ok_or(ParserError::MissingWcnfHeader)?;

        if formula.var_count() > header_vars {
            return Err(ParserError::VarCount {
                var_count: formula.var_count(),
                header_var_count: header_vars,
            }
            .into());
        }
        formula.set_var_count(header_vars);

        if formula.len() != header_clauses {
            return Err(ParserError::ClauseCount {
                clause_count: formula.len(),
                header_clause_count: header_clauses,
            }
            .into());
        }

        Ok(formula)
    }
}

fn parse_wcnf_header(line: &str, line_number: usize) -> Result<(usize, usize, u64), ParserError> {
    let invalid = || ParserError::InvalidHeader {
        line: line_number,
        header: line.to_owned(),
    };

    let mut values = line[1..].split_whitespace();

    if values.next() != Some("wcnf") {
        return Err(invalid());
    }

    let var_count: usize = values
        .next()
        .and_then(|value| value.parse().ok())
        .ok_or_else(invalid)?;

    if var_count > Var::max_count() {
        return Err(ParserError::LiteralTooLarge {
            line: line_number,
            index: var_count / 10,
            final_digit: var_count % 10,
        });
    }

    let clause_count: usize = values
        .next()
        .and_then(|value| value.parse().ok())
        .ok_or_else(invalid)?;

    let top: u64 = values
        .next()
        .and_then(|value| value.parse().ok())
        .ok_or_else(invalid)?;

    if values.next().is_some() {
        return Err(invalid());
    }

    Ok((var_count, clause_count, top))
}

/// Write a weighted formula as WCNF.
pub fn write_wcnf(target: &mut impl io::Write, formula: &WcnfFormula) -> io::Result<()> {
    writeln!(
        target,
        "p wcnf {} {} {}",
        formula.var_count(),
        formula.len(),
        formula.top_weight()
    )?;
    for (weight, clause) in formula.iter() {
        itoa::write(&mut *target, weight)?;
        target.write_all(b" ")?;
        for lit in clause {
            itoa::write(&mut *target, lit.to_dimacs())?;
            target.write_all(b" ")?;
        }
        target.write_all(b"0\n")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use marrow_formula::lits;

    #[test]
    fn parse_simple_wcnf() {
        let input = b"c example\np wcnf 4 4 100\n100 1 2 0\n100 -1 3 0\n3 4 0\n1 -4 0\n";
        let formula = WcnfParser::parse(&input[..]).unwrap();

        assert_eq!(formula.top_weight(), 100);
        assert_eq!(formula.var_count(), 4);
        assert_eq!(formula.len(), 4);

        let clauses: Vec<_> = formula.iter().collect();
        assert_eq!(clauses[0], (100, &lits![1, 2][..]));
        assert_eq!(clauses[1], (100, &lits![-1, 3][..]));
        assert_eq!(clauses[2], (3, &lits![4][..]));
        assert_eq!(clauses[3], (1, &lits![-4][..]));

        assert!(formula.is_hard(0));
        assert!(!formula.is_hard(2));
    }

    #[test]
    fn missing_header() {
        assert!(WcnfParser::parse(&b"100 1 2 0\n"[..]).is_err());
    }

    #[test]
    fn cnf_header_rejected() {
        assert!(WcnfParser::parse(&b"p cnf 2 1\n1 2 0\n"[..]).is_err());
    }

    #[test]
    fn roundtrip() {
        let mut formula = WcnfFormula::new(50);
        formula.add_clause(50, &lits![1, -2, 3]);
        formula.add_clause(7, &lits![-3]);
        formula.add_clause(50, &lits![2]);

        let mut buf = vec![];
        write_wcnf(&mut buf, &formula).unwrap();

        let parsed = WcnfParser::parse(&buf[..]).unwrap();
        assert_eq!(parsed.top_weight(), formula.top_weight());
        assert_eq!(parsed.var_count(), formula.var_count());
        let a: Vec<_> = formula.iter().map(|(w, c)| (w, c.to_vec())).collect();
        let b: Vec<_> = parsed.iter().map(|(w, c)| (w, c.to_vec())).collect();
        assert_eq!(a, b);
    }
}
