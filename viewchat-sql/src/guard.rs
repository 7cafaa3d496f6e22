use viewchat_core::ViewchatError;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(String),
    QuotedIdent(String),
    StringLiteral,
    Number,
    Symbol(char),
    Semicolon,
    LeftParen,
    RightParen,
    Comma,
    Dot,
}

fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '-' if input_starts(&chars, "--") => skip_line(&mut chars),
            '#' => skip_line(&mut chars),
            '/' if input_starts(&chars, "/*") => skip_block_comment(&mut chars)?,
            '\'' => {
                skip_quoted(&mut chars, '\'')?;
                tokens.push(Token::StringLiteral);
            }
            '"' | '`' => {
                let ident = skip_quoted(&mut chars, c)?;
                tokens.push(Token::QuotedIdent(ident));
            }
            ';' => {
                chars.next();
                tokens.push(Token::Semicolon);
            }
            '(' => {
                chars.next();
                tokens.push(Token::LeftParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RightParen);
            }
            ',' => {
                chars.next();
                tokens.push(Token::Comma);
            }
            '.' => {
                chars.next();
                tokens.push(Token::Dot);
            }
            '0'..='9' => {
                while matches!(chars.peek(), Some(d) if d.is_ascii_alphanumeric() || *d == '.') {
                    chars.next();
                }
                tokens.push(Token::Number);
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut word = String::new();
                while let Some(&w) = chars.peek() {
                    if w.is_alphanumeric() || w == '_' || w == '$' {
                        word.push(w);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Word(word));
            }
            other => {
                chars.next();
                tokens.push(Token::Symbol(other));
            }
        }
    }

    Ok(tokens)
}

fn input_starts<I>(chars: &std::iter::Peekable<I>, prefix: &str) -> bool
where
    I: Iterator<Item = char> + Clone,
{
    let mut lookahead = chars.clone();
    prefix.chars().all(|p| lookahead.next() == Some(p))
}

fn skip_line<I>(chars: &mut std::iter::Peekable<I>)
where
    I: Iterator<Item = char>,
{
    for c in chars.by_ref() {
        if c == '\n' {
            break;
        }
    }
}

fn skip_block_comment<I>(chars: &mut std::iter::Peekable<I>) -> Result<(), String>
where
    I: Iterator<Item = char>,
{
    chars.next(); // '/'
    chars.next(); // '*'
    let mut previous = '\0';
    for c in chars.by_ref() {
        if previous == '*' && c == '/' {
            return Ok(());
        }
        previous = c;
    }
    Err("unterminated block comment".to_string())
}

/// Consumes a quoted run, honouring doubled quotes.
///
/// SQLite reads a backslash inside `'...'` or `"..."` literally while MySQL
/// treats it as an escape, so the two disagree on where such a run ends.
/// Backslashes there are refused outright; backtick runs never escape.
fn skip_quoted<I>(chars: &mut std::iter::Peekable<I>, quote: char) -> Result<String, String>
where
    I: Iterator<Item = char>,
{
    chars.next(); // opening quote
    let mut content = String::new();
    while let Some(c) = chars.next() {
        if c == '\\' && quote != '`' {
            return Err("backslash inside a quoted literal is not allowed".to_string());
        }
        if c == quote {
            if chars.peek() == Some(&quote) {
                chars.next();
                content.push(quote);
                continue;
            }
            return Ok(content);
        }
        content.push(c);
    }
    Err(format!("unterminated {quote} quote"))
}

const FORBIDDEN: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "DROP", "ALTER", "CREATE", "REPLACE", "TRUNCATE", "GRANT",
    "REVOKE", "MERGE", "CALL", "EXEC", "EXECUTE", "SET", "LOCK", "UNLOCK", "INTO", "LOAD",
    "HANDLER", "ATTACH", "DETACH", "PRAGMA", "VACUUM", "RENAME", "COMMIT", "ROLLBACK",
    "SLEEP", "BENCHMARK", "LOAD_FILE", "OUTFILE", "DUMPFILE",
];

/// Keywords that end a FROM clause's relation list.
const CLAUSE_END: &[&str] = &[
    "WHERE", "GROUP", "HAVING", "ORDER", "LIMIT", "OFFSET", "UNION", "INTERSECT", "EXCEPT",
    "WINDOW", "ON", "USING", "JOIN", "INNER", "LEFT", "RIGHT", "FULL", "CROSS", "NATURAL",
    "STRAIGHT_JOIN", "FOR",
];

fn is_keyword(word: &str, set: &[&str]) -> bool {
    set.iter().any(|k| k.eq_ignore_ascii_case(word))
}

/// Parse-based allow-list applied before anything reaches the store:
/// one `SELECT` statement, no writes or session changes, and no relation
/// other than the configured view.
#[derive(Clone, Debug)]
pub struct ReadOnlyGuard {
    view: String,
}

impl ReadOnlyGuard {
    pub fn new(view: impl Into<String>) -> Self {
        Self { view: view.into() }
    }

    pub fn view(&self) -> &str {
        &self.view
    }

    pub fn check(&self, sql: &str) -> Result<(), ViewchatError> {
        self.inspect(sql).map_err(|reason| ViewchatError::UnsafeQuery {
            query: sql.to_string(),
            reason,
        })
    }

    fn inspect(&self, sql: &str) -> Result<(), String> {
        let mut tokens = tokenize(sql)?;
        while tokens.last() == Some(&Token::Semicolon) {
            tokens.pop();
        }
        if tokens.contains(&Token::Semicolon) {
            return Err("multiple statements are not allowed".to_string());
        }

        match tokens.first() {
            Some(Token::Word(word)) if word.eq_ignore_ascii_case("SELECT") => {}
            Some(_) => return Err("statement must start with SELECT".to_string()),
            None => return Err("empty statement".to_string()),
        }

        let mut depth = 0i32;
        for token in &tokens {
            match token {
                Token::Word(word) if is_keyword(word, FORBIDDEN) => {
                    return Err(format!("keyword {} is not allowed", word.to_ascii_uppercase()));
                }
                Token::LeftParen => depth += 1,
                Token::RightParen => {
                    depth -= 1;
                    if depth < 0 {
                        return Err("unbalanced parentheses".to_string());
                    }
                }
                _ => {}
            }
        }
        if depth != 0 {
            return Err("unbalanced parentheses".to_string());
        }

        self.check_relations(&tokens)
    }

    /// Only FROM/JOIN at query level name relations; `EXTRACT(YEAR FROM x)`
    /// and friends sit inside a function call and are skipped.
    fn check_relations(&self, tokens: &[Token]) -> Result<(), String> {
        let mut query_level = vec![true];
        for (index, token) in tokens.iter().enumerate() {
            match token {
                Token::LeftParen => query_level.push(matches!(
                    tokens.get(index + 1),
                    Some(Token::Word(next)) if next.eq_ignore_ascii_case("SELECT")
                )),
                Token::RightParen => {
                    query_level.pop();
                }
                Token::Word(word) if query_level.last() == Some(&true) => {
                    if word.eq_ignore_ascii_case("FROM") {
                        self.check_from_list(tokens, index + 1)?;
                    } else if word.eq_ignore_ascii_case("JOIN")
                        || word.eq_ignore_ascii_case("STRAIGHT_JOIN")
                    {
                        self.check_relation_at(tokens, index + 1)?;
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Walks `a [AS] x, b y, (subquery) z` at one nesting level.
    fn check_from_list(&self, tokens: &[Token], start: usize) -> Result<(), String> {
        let mut index = self.check_relation_at(tokens, start)?;
        let mut depth = 0i32;
        while let Some(token) = tokens.get(index) {
            match token {
                Token::LeftParen => depth += 1,
                Token::RightParen if depth == 0 => break,
                Token::RightParen => depth -= 1,
                Token::Comma if depth == 0 => {
                    index = self.check_relation_at(tokens, index + 1)?;
                    continue;
                }
                Token::Word(word) if depth == 0 && is_keyword(word, CLAUSE_END) => break,
                _ => {}
            }
            index += 1;
        }
        Ok(())
    }

    /// Validates the relation starting at `index` and returns the index
    /// just past it. A parenthesised subquery is checked through its own
    /// FROM clause.
    fn check_relation_at(&self, tokens: &[Token], index: usize) -> Result<usize, String> {
        match tokens.get(index) {
            Some(Token::LeftParen) => Ok(index),
            Some(Token::Word(_)) | Some(Token::QuotedIdent(_)) => {
                let mut last = index;
                while matches!(tokens.get(last + 1), Some(Token::Dot))
                    && matches!(
                        tokens.get(last + 2),
                        Some(Token::Word(_)) | Some(Token::QuotedIdent(_))
                    )
                {
                    last += 2;
                }
                let name = match &tokens[last] {
                    Token::Word(name) | Token::QuotedIdent(name) => name,
                    _ => return Err("expected a relation name".to_string()),
                };
                if name.eq_ignore_ascii_case(&self.view) {
                    Ok(last + 1)
                } else {
                    Err(format!("relation '{name}' is not queryable"))
                }
            }
            _ => Err("expected a relation name".to_string()),
        }
    }
}
