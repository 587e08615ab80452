//! Grammar:
//! ```text
//! querystring := clause ("," clause)*
//! clause      := ["-"] clauseBody
//! clauseBody  := functionCall | keyValue | filename
//! functionCall:= name "[" arg ("," arg)* "]"
//! keyValue    := filename "=" content
//! filename    := path with components matching /^[A-Za-z0-9_.-]+$/
//! ```
//! Commas inside `[...]` are not separators. The querystring is URL-decoded
//! before parsing. A leading `-` inverts the clause.

use entityfs_core::validate::{is_valid_attribute_path, is_valid_entity_id};
use percent_encoding::percent_decode_str;

use super::{Clause, ClauseKind, QueryError};

/// Parse a full querystring (one virtual path component under `query/…`).
pub fn parse(raw: &str) -> Result<Vec<Clause>, QueryError> {
    let decoded = percent_decode_str(raw)
        .decode_utf8()
        .map_err(|e| QueryError::InvalidArgument(format!("invalid percent-encoding: {e}")))?;

    if decoded.is_empty() {
        return Ok(Vec::new());
    }

    split_balanced(&decoded, ',')?
        .into_iter()
        .map(|raw_clause| parse_clause(&raw_clause))
        .collect()
}

fn parse_clause(raw: &str) -> Result<Clause, QueryError> {
    let (negated, body) = match raw.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, raw),
    };
    if body.is_empty() {
        return Err(QueryError::InvalidArgument("empty clause".to_string()));
    }
    let kind = parse_clause_body(body)?;
    Ok(Clause { negated, kind })
}

fn parse_clause_body(body: &str) -> Result<ClauseKind, QueryError> {
    if let Some(bracket_pos) = body.find('[') {
        return parse_function_call(body, bracket_pos);
    }
    if let Some(eq_pos) = body.find('=') {
        let filename = &body[..eq_pos];
        let content = &body[eq_pos + 1..];
        if !is_valid_attribute_path(filename) {
            return Err(QueryError::InvalidArgument(format!(
                "invalid filename in key=value clause: {filename:?}"
            )));
        }
        return Ok(ClauseKind::FileContents(
            filename.to_string(),
            content.as_bytes().to_vec(),
        ));
    }
    if !is_valid_attribute_path(body) {
        return Err(QueryError::InvalidArgument(format!(
            "invalid filename: {body:?}"
        )));
    }
    Ok(ClauseKind::FileExists(body.to_string()))
}

fn parse_function_call(body: &str, bracket_pos: usize) -> Result<ClauseKind, QueryError> {
    if !body.ends_with(']') {
        return Err(QueryError::InvalidArgument(format!(
            "unmatched bracket in clause: {body:?}"
        )));
    }
    let name = &body[..bracket_pos];
    let inner = &body[bracket_pos + 1..body.len() - 1];
    let args = if inner.is_empty() {
        Vec::new()
    } else {
        split_balanced(inner, ',')?
    };
    build_function_clause(name, &args)
}

fn build_function_clause(name: &str, args: &[String]) -> Result<ClauseKind, QueryError> {
    match name {
        "random" => {
            let arg = expect_arg_count(name, args, 1)?;
            let n: i64 = arg[0]
                .parse()
                .map_err(|_| QueryError::InvalidArgument(format!("random[n]: not an integer: {:?}", arg[0])))?;
            Ok(ClauseKind::RandomSelection(n))
        }
        "blank" => {
            let arg = expect_arg_count(name, args, 1)?;
            validate_path_arg(name, &arg[0])?;
            Ok(ClauseKind::FileHasTrimmedContents(arg[0].clone()))
        }
        "id" => {
            let arg = expect_arg_count(name, args, 1)?;
            if !is_valid_entity_id(&arg[0]) {
                return Err(QueryError::InvalidArgument(format!(
                    "id[...]: invalid entity id: {:?}",
                    arg[0]
                )));
            }
            Ok(ClauseKind::EntityIdEquals(arg[0].clone()))
        }
        "shard" => {
            if args.is_empty() || args.len() > 2 {
                return Err(QueryError::InvalidArgument(format!(
                    "shard[...]: expected 1 or 2 arguments, got {}",
                    args.len()
                )));
            }
            validate_shard_arg(&args[0])?;
            let second = match args.get(1) {
                Some(h2) => {
                    validate_shard_arg(h2)?;
                    Some(h2.clone())
                }
                None => None,
            };
            Ok(ClauseKind::EntityInShard(args[0].clone(), second))
        }
        other => Err(QueryError::InvalidArgument(format!(
            "unknown function: {other:?}"
        ))),
    }
}

fn expect_arg_count<'a>(
    name: &str,
    args: &'a [String],
    expected: usize,
) -> Result<&'a [String], QueryError> {
    if args.len() != expected {
        return Err(QueryError::InvalidArgument(format!(
            "{name}[...]: expected {expected} argument(s), got {}",
            args.len()
        )));
    }
    Ok(args)
}

fn validate_path_arg(fn_name: &str, arg: &str) -> Result<(), QueryError> {
    if !is_valid_attribute_path(arg) {
        return Err(QueryError::InvalidArgument(format!(
            "{fn_name}[...]: invalid path argument: {arg:?}"
        )));
    }
    Ok(())
}

fn validate_shard_arg(arg: &str) -> Result<(), QueryError> {
    if arg.len() != 2 || !arg.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(QueryError::InvalidArgument(format!(
            "shard[...]: expected 2 hex digits, got {arg:?}"
        )));
    }
    Ok(())
}

/// Split `s` on `sep` at bracket-depth zero (`[` / `]` are the only
/// brackets in this grammar). Errors if brackets end up unbalanced.
fn split_balanced(s: &str, sep: char) -> Result<Vec<String>, QueryError> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut depth: i32 = 0;
    for c in s.chars() {
        match c {
            '[' => {
                depth += 1;
                current.push(c);
            }
            ']' => {
                depth -= 1;
                if depth < 0 {
                    return Err(QueryError::InvalidArgument(format!(
                        "unmatched closing bracket in: {s:?}"
                    )));
                }
                current.push(c);
            }
            c if c == sep && depth == 0 => {
                out.push(std::mem::take(&mut current));
            }
            c => current.push(c),
        }
    }
    if depth != 0 {
        return Err(QueryError::InvalidArgument(format!(
            "unmatched opening bracket in: {s:?}"
        )));
    }
    out.push(current);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_filename_as_file_exists() {
        let clauses = parse("religion").unwrap();
        assert_eq!(
            clauses,
            vec![Clause {
                negated: false,
                kind: ClauseKind::FileExists("religion".to_string())
            }]
        );
    }

    #[test]
    fn parses_negation() {
        let clauses = parse("-religion").unwrap();
        assert!(clauses[0].negated);
    }

    #[test]
    fn parses_key_value() {
        let clauses = parse("sex=male").unwrap();
        assert_eq!(
            clauses[0].kind,
            ClauseKind::FileContents("sex".to_string(), b"male".to_vec())
        );
    }

    #[test]
    fn commas_inside_brackets_are_not_separators() {
        let clauses = parse("shard[1a,2b],religion").unwrap();
        assert_eq!(clauses.len(), 2);
        assert_eq!(
            clauses[0].kind,
            ClauseKind::EntityInShard("1a".to_string(), Some("2b".to_string()))
        );
    }

    #[test]
    fn compound_query_splits_on_top_level_comma() {
        let clauses = parse("fictional,firstname=Scratchy").unwrap();
        assert_eq!(clauses.len(), 2);
    }

    #[test]
    fn url_decodes_before_parsing() {
        let clauses = parse("firstname%3DScratchy").unwrap();
        assert_eq!(
            clauses[0].kind,
            ClauseKind::FileContents("firstname".to_string(), b"Scratchy".to_vec())
        );
    }

    #[test]
    fn unmatched_bracket_is_invalid_argument() {
        assert!(matches!(
            parse("blank[foo"),
            Err(QueryError::InvalidArgument(_))
        ));
    }

    #[test]
    fn unknown_function_is_invalid_argument() {
        assert!(matches!(
            parse("frobnicate[1]"),
            Err(QueryError::InvalidArgument(_))
        ));
    }

    #[test]
    fn wrong_arg_count_is_invalid_argument() {
        assert!(matches!(
            parse("blank[a,b]"),
            Err(QueryError::InvalidArgument(_))
        ));
    }

    #[test]
    fn random_parses_as_reserved_clause() {
        let clauses = parse("random[5]").unwrap();
        assert_eq!(clauses[0].kind, ClauseKind::RandomSelection(5));
    }
}
