//! Recursive-descent parser for the SQL dialect.

use crate::error::{Result, StratumError};
use crate::vm::IsolationLevel;

use super::ast::*;
use super::token::Tokenizer;

pub fn parse(statement: &[u8]) -> Result<Statement> {
    let mut tk = Tokenizer::new(statement);
    let head = tk.peek()?;
    tk.pop();

    let parsed = match head.as_str() {
        "begin" => parse_begin(&mut tk),
        "commit" => parse_single(&mut tk, Statement::Commit),
        "abort" => parse_single(&mut tk, Statement::Abort),
        "show" => parse_single(&mut tk, Statement::Show),
        "create" => parse_create(&mut tk),
        "drop" => parse_drop(&mut tk),
        "insert" => parse_insert(&mut tk),
        "select" => parse_select(&mut tk),
        "update" => parse_update(&mut tk),
        "delete" => parse_delete(&mut tk),
        _ => Err(StratumError::InvalidCommand),
    };

    let stat = parsed?;
    if !tk.peek()?.is_empty() {
        return Err(StratumError::InvalidStatement(tk.err_stat()));
    }
    Ok(stat)
}

fn is_name(token: &str) -> bool {
    let bytes = token.as_bytes();
    !(bytes.len() == 1 && !bytes[0].is_ascii_alphabetic())
}

fn is_type(token: &str) -> bool {
    matches!(token, "int32" | "int64" | "string")
}

fn expect(tk: &mut Tokenizer<'_>, word: &str) -> Result<()> {
    if tk.peek()? != word {
        return Err(StratumError::InvalidCommand);
    }
    tk.pop();
    Ok(())
}

fn name(tk: &mut Tokenizer<'_>) -> Result<String> {
    let token = tk.peek()?;
    if !is_name(&token) {
        return Err(StratumError::InvalidCommand);
    }
    tk.pop();
    Ok(token)
}

fn parse_single(tk: &mut Tokenizer<'_>, stat: Statement) -> Result<Statement> {
    if !tk.peek()?.is_empty() {
        return Err(StratumError::InvalidCommand);
    }
    Ok(stat)
}

fn parse_begin(tk: &mut Tokenizer<'_>) -> Result<Statement> {
    let token = tk.peek()?;
    if token.is_empty() {
        return Ok(Statement::Begin(Begin {
            level: IsolationLevel::ReadCommitted,
        }));
    }
    if token != "isolation" {
        return Err(StratumError::InvalidCommand);
    }
    tk.pop();
    expect(tk, "level")?;

    let level = match tk.peek()?.as_str() {
        "read" => {
            tk.pop();
            expect(tk, "committed")?;
            IsolationLevel::ReadCommitted
        }
        "repeatable" => {
            tk.pop();
            expect(tk, "read")?;
            IsolationLevel::RepeatableRead
        }
        _ => return Err(StratumError::InvalidCommand),
    };
    if !tk.peek()?.is_empty() {
        return Err(StratumError::InvalidCommand);
    }
    Ok(Statement::Begin(Begin { level }))
}

fn parse_create(tk: &mut Tokenizer<'_>) -> Result<Statement> {
    expect(tk, "table")?;
    let table = name(tk)?;

    let mut fields = Vec::new();
    loop {
        let token = tk.peek()?;
        if token == "(" {
            break;
        }
        if !is_name(&token) {
            return Err(StratumError::InvalidCommand);
        }
        tk.pop();
        let ftype = tk.peek()?;
        if !is_type(&ftype) {
            return Err(StratumError::InvalidField);
        }
        tk.pop();
        fields.push((token, ftype));

        match tk.peek()?.as_str() {
            "," => tk.pop(),
            "(" => break,
            "" => return Err(StratumError::TableNoIndex),
            _ => return Err(StratumError::InvalidCommand),
        }
    }
    tk.pop();

    expect(tk, "index")?;
    let mut indexes = Vec::new();
    loop {
        let token = tk.peek()?;
        if token == ")" {
            tk.pop();
            break;
        }
        if !is_name(&token) {
            return Err(StratumError::InvalidCommand);
        }
        tk.pop();
        indexes.push(token);
    }
    if indexes.is_empty() {
        return Err(StratumError::TableNoIndex);
    }

    Ok(Statement::Create(Create {
        table,
        fields,
        indexes,
    }))
}

fn parse_drop(tk: &mut Tokenizer<'_>) -> Result<Statement> {
    expect(tk, "table")?;
    let table = name(tk)?;
    Ok(Statement::Drop(Drop { table }))
}

fn parse_insert(tk: &mut Tokenizer<'_>) -> Result<Statement> {
    expect(tk, "into")?;
    let table = name(tk)?;
    expect(tk, "values")?;

    let mut values = Vec::new();
    loop {
        let token = tk.peek()?;
        if token.is_empty() {
            break;
        }
        tk.pop();
        values.push(token);
    }
    Ok(Statement::Insert(Insert { table, values }))
}

fn parse_select(tk: &mut Tokenizer<'_>) -> Result<Statement> {
    let mut fields = Vec::new();
    if tk.peek()? == "*" {
        fields.push("*".to_string());
        tk.pop();
    } else {
        loop {
            fields.push(name(tk)?);
            if tk.peek()? == "," {
                tk.pop();
            } else {
                break;
            }
        }
    }

    expect(tk, "from")?;
    let table = name(tk)?;

    let where_clause = if tk.peek()?.is_empty() {
        None
    } else {
        Some(parse_where(tk)?)
    };
    Ok(Statement::Select(Select {
        fields,
        table,
        where_clause,
    }))
}

fn parse_update(tk: &mut Tokenizer<'_>) -> Result<Statement> {
    let table = name(tk)?;
    expect(tk, "set")?;
    let field = name(tk)?;
    expect(tk, "=")?;
    let value = tk.peek()?;
    tk.pop();

    let where_clause = if tk.peek()?.is_empty() {
        None
    } else {
        Some(parse_where(tk)?)
    };
    Ok(Statement::Update(Update {
        table,
        field,
        value,
        where_clause,
    }))
}

fn parse_delete(tk: &mut Tokenizer<'_>) -> Result<Statement> {
    expect(tk, "from")?;
    let table = name(tk)?;
    let where_clause = parse_where(tk)?;
    Ok(Statement::Delete(Delete {
        table,
        where_clause,
    }))
}

fn parse_where(tk: &mut Tokenizer<'_>) -> Result<Where> {
    expect(tk, "where")?;
    let first = parse_comparison(tk)?;

    let token = tk.peek()?;
    if token.is_empty() {
        return Ok(Where { first, rest: None });
    }
    let logic = match token.as_str() {
        "and" => LogicOp::And,
        "or" => LogicOp::Or,
        _ => return Err(StratumError::InvalidCommand),
    };
    tk.pop();
    let second = parse_comparison(tk)?;
    if !tk.peek()?.is_empty() {
        return Err(StratumError::InvalidCommand);
    }
    Ok(Where {
        first,
        rest: Some((logic, second)),
    })
}

fn parse_comparison(tk: &mut Tokenizer<'_>) -> Result<Comparison> {
    let field = name(tk)?;
    let op = match tk.peek()?.as_str() {
        "=" => CmpOp::Eq,
        "<" => CmpOp::Lt,
        ">" => CmpOp::Gt,
        _ => return Err(StratumError::InvalidCommand),
    };
    tk.pop();
    let value = tk.peek()?;
    tk.pop();
    Ok(Comparison { field, op, value })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_variants() {
        assert_eq!(
            parse(b"begin").unwrap(),
            Statement::Begin(Begin {
                level: IsolationLevel::ReadCommitted
            })
        );
        assert_eq!(
            parse(b"begin isolation level read committed").unwrap(),
            Statement::Begin(Begin {
                level: IsolationLevel::ReadCommitted
            })
        );
        assert_eq!(
            parse(b"begin isolation level repeatable read").unwrap(),
            Statement::Begin(Begin {
                level: IsolationLevel::RepeatableRead
            })
        );
        assert!(parse(b"begin isolation level serializable").is_err());
    }

    #[test]
    fn create_with_fields_and_index() {
        let stat = parse(b"create table users id int32, name string, age int64 (index id age)")
            .unwrap();
        assert_eq!(
            stat,
            Statement::Create(Create {
                table: "users".into(),
                fields: vec![
                    ("id".into(), "int32".into()),
                    ("name".into(), "string".into()),
                    ("age".into(), "int64".into()),
                ],
                indexes: vec!["id".into(), "age".into()],
            })
        );
    }

    #[test]
    fn create_requires_an_index_block() {
        assert!(matches!(
            parse(b"create table t id int32"),
            Err(StratumError::TableNoIndex)
        ));
    }

    #[test]
    fn create_rejects_unknown_types() {
        assert!(matches!(
            parse(b"create table t id float (index id)"),
            Err(StratumError::InvalidField)
        ));
    }

    #[test]
    fn insert_collects_values() {
        assert_eq!(
            parse(b"insert into t values 5 'two words' 9").unwrap(),
            Statement::Insert(Insert {
                table: "t".into(),
                values: vec!["5".into(), "two words".into(), "9".into()],
            })
        );
    }

    #[test]
    fn select_star_and_fields() {
        assert_eq!(
            parse(b"select * from t").unwrap(),
            Statement::Select(Select {
                fields: vec!["*".into()],
                table: "t".into(),
                where_clause: None,
            })
        );
        let stat = parse(b"select id, name from t where id = 3").unwrap();
        match stat {
            Statement::Select(sel) => {
                assert_eq!(sel.fields, vec!["id", "name"]);
                let w = sel.where_clause.unwrap();
                assert_eq!(
                    w.first,
                    Comparison {
                        field: "id".into(),
                        op: CmpOp::Eq,
                        value: "3".into()
                    }
                );
                assert!(w.rest.is_none());
            }
            other => panic!("wrong statement: {other:?}"),
        }
    }

    #[test]
    fn where_with_two_comparisons() {
        let stat = parse(b"delete from t where id > 3 and id < 10").unwrap();
        match stat {
            Statement::Delete(del) => {
                let (logic, second) = del.where_clause.rest.unwrap();
                assert_eq!(logic, LogicOp::And);
                assert_eq!(second.op, CmpOp::Lt);
            }
            other => panic!("wrong statement: {other:?}"),
        }
    }

    #[test]
    fn update_with_and_without_where() {
        assert!(parse(b"update t set name = 'x'").is_ok());
        assert!(parse(b"update t set name = 'x' where id = 1").is_ok());
        assert!(parse(b"update t put name = 'x'").is_err());
    }

    #[test]
    fn trailing_tokens_are_an_error() {
        assert!(matches!(
            parse(b"commit please"),
            Err(StratumError::InvalidCommand)
        ));
        assert!(matches!(
            parse(b"drop table t extra"),
            Err(StratumError::InvalidStatement(_))
        ));
    }

    #[test]
    fn delete_requires_a_where_clause() {
        assert!(parse(b"delete from t").is_err());
    }
}
