//! Compiles a parsed clause list into a parameterized SQL join tree
//! (`spec.md` §4.3 "ParsedQuery").
//!
//! `EntityIdEquals` and non-inverted shard clauses fold directly into the
//! base `WHERE` (no join needed). Every other clause becomes an aliased
//! `LEFT JOIN items jN` carrying the basic-join expression plus a
//! clause-specific predicate; negation wraps the resulting `WHERE`
//! condition in `NOT (...)`.

use rusqlite::types::Value;
use sha2::{Digest, Sha256};

use super::{Clause, ClauseKind, QueryError};
use crate::whitespace;

pub struct CompiledQuery {
    pub sql: String,
    pub params: Vec<(String, Value)>,
}

fn push_var(params: &mut Vec<(String, Value)>, var_counter: &mut usize, value: Value) -> String {
    let var = format!(":var{var_counter}");
    *var_counter += 1;
    params.push((var.clone(), value));
    var
}

pub fn compile(clauses: &[Clause], namespace: &str) -> Result<CompiledQuery, QueryError> {
    let mut params: Vec<(String, Value)> =
        vec![(":ns".to_string(), Value::from(namespace.to_string()))];
    let mut base_conditions = vec![
        "base.active = 1".to_string(),
        "base.tombstone = 0".to_string(),
        "base.namespace = :ns".to_string(),
    ];
    let mut joins = Vec::new();
    let mut where_extra = Vec::new();
    let mut var_counter = 1usize;
    let mut join_counter = 1usize;

    for clause in clauses {
        match (&clause.kind, clause.negated) {
            (ClauseKind::EntityIdEquals(id), false) => {
                let var = push_var(&mut params, &mut var_counter, Value::from(id.clone()));
                base_conditions.push(format!("base.entity_id = {var}"));
            }
            (ClauseKind::EntityInShard(h1, h2), false) => {
                let var1 = push_var(&mut params, &mut var_counter, Value::from(h1.clone()));
                base_conditions.push(format!("base.entity_id_shard1 = {var1}"));
                if let Some(h2) = h2 {
                    let var2 = push_var(&mut params, &mut var_counter, Value::from(h2.clone()));
                    base_conditions.push(format!("base.entity_id_shard2 = {var2}"));
                }
            }
            (ClauseKind::RandomSelection(_), _) => {
                return Err(QueryError::Unimplemented(
                    "random[n] selection is not executable".to_string(),
                ));
            }
            _ => {
                let alias = format!("j{join_counter}");
                join_counter += 1;
                let mut join_conditions = vec![
                    format!("{alias}.namespace = :ns"),
                    format!("base.entity_id = {alias}.entity_id"),
                    format!("{alias}.active = 1"),
                    format!("{alias}.tombstone = 0"),
                ];
                append_clause_predicate(
                    &clause.kind,
                    &alias,
                    &mut join_conditions,
                    &mut params,
                    &mut var_counter,
                )?;
                joins.push(format!(
                    "LEFT JOIN items {alias} ON {}",
                    join_conditions.join(" AND ")
                ));
                let condition = format!("{alias}.row_guid IS NOT NULL");
                where_extra.push(if clause.negated {
                    format!("NOT ({condition})")
                } else {
                    condition
                });
            }
        }
    }

    let mut where_clause = base_conditions;
    where_clause.extend(where_extra);

    let sql = format!(
        "SELECT DISTINCT base.entity_id FROM items base {} WHERE {} ORDER BY base.entity_id",
        joins.join(" "),
        where_clause.join(" AND ")
    );

    Ok(CompiledQuery { sql, params })
}

fn append_clause_predicate(
    kind: &ClauseKind,
    alias: &str,
    join_conditions: &mut Vec<String>,
    params: &mut Vec<(String, Value)>,
    var_counter: &mut usize,
) -> Result<(), QueryError> {
    match kind {
        ClauseKind::FileExists(filename) => {
            let var = push_var(params, var_counter, Value::from(filename.clone()));
            join_conditions.push(format!("{alias}.filename = {var}"));
        }
        ClauseKind::FileContents(filename, content) => {
            let var_fn = push_var(params, var_counter, Value::from(filename.clone()));
            join_conditions.push(format!("{alias}.filename = {var_fn}"));

            let (_, trimmed, _) = whitespace::partition(content);
            let trimmed_len = trimmed.len() as i64;
            let var_len = push_var(params, var_counter, Value::from(trimmed_len));
            join_conditions.push(format!("{alias}.trimmed_length = {var_len}"));

            if trimmed_len == 0 {
                join_conditions.push(format!("{alias}.trimmed_data IS NULL"));
            } else {
                let mut hasher = Sha256::new();
                hasher.update(trimmed);
                let digest = hasher.finalize().to_vec();
                let var_hash = push_var(params, var_counter, Value::from(digest));
                join_conditions.push(format!("{alias}.trimmed_sha256 = {var_hash}"));
            }
        }
        ClauseKind::FileHasTrimmedContents(filename) => {
            let var_fn = push_var(params, var_counter, Value::from(filename.clone()));
            join_conditions.push(format!("{alias}.filename = {var_fn}"));
            join_conditions.push(format!("{alias}.trimmed_length = 0"));
        }
        ClauseKind::EntityIdEquals(id) => {
            let var = push_var(params, var_counter, Value::from(id.clone()));
            join_conditions.push(format!("{alias}.entity_id = {var}"));
        }
        ClauseKind::EntityInShard(h1, h2) => {
            let var1 = push_var(params, var_counter, Value::from(h1.clone()));
            join_conditions.push(format!("{alias}.entity_id_shard1 = {var1}"));
            if let Some(h2) = h2 {
                let var2 = push_var(params, var_counter, Value::from(h2.clone()));
                join_conditions.push(format!("{alias}.entity_id_shard2 = {var2}"));
            }
        }
        ClauseKind::RandomSelection(_) => unreachable!("handled before reaching join compilation"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::parse;

    #[test]
    fn entity_id_equals_folds_into_base_where() {
        let clauses = parse("id[homer]").unwrap();
        let compiled = compile(&clauses, "").unwrap();
        assert!(!compiled.sql.contains("LEFT JOIN"));
        assert!(compiled.sql.contains("base.entity_id ="));
    }

    #[test]
    fn file_exists_generates_join() {
        let clauses = parse("religion").unwrap();
        let compiled = compile(&clauses, "").unwrap();
        assert!(compiled.sql.contains("LEFT JOIN items j1"));
        assert!(compiled.sql.contains("j1.row_guid IS NOT NULL"));
    }

    #[test]
    fn negated_clause_wraps_in_not() {
        let clauses = parse("-religion").unwrap();
        let compiled = compile(&clauses, "").unwrap();
        assert!(compiled.sql.contains("NOT (j1.row_guid IS NOT NULL)"));
    }

    #[test]
    fn random_is_rejected_at_compile_time() {
        let clauses = parse("random[3]").unwrap();
        assert!(matches!(
            compile(&clauses, ""),
            Err(QueryError::Unimplemented(_))
        ));
    }

    #[test]
    fn params_are_numbered_in_order() {
        let clauses = parse("religion,sex=male").unwrap();
        let compiled = compile(&clauses, "").unwrap();
        let names: Vec<&str> = compiled.params.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names[0], ":ns");
        assert_eq!(names[1], ":var1");
        assert_eq!(names[2], ":var2");
    }
}
