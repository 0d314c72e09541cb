//! Parser - Parse .sta configuration files
//!
//! Convert the configuration language to resource specifications using pest

use pest::Parser;
use pest::iterators::{Pair, Pairs};
use pest_derive::Parser;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::env;

use crate::resource::{Lifecycle, ResourceSpec, Value};

#[derive(Parser)]
#[grammar = "parser/strata.pest"]
struct StrataParser;

/// Parse error
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("Syntax error: {0}")]
    Syntax(#[from] pest::error::Error<Rule>),

    #[error("Invalid expression at line {line}: {message}")]
    InvalidExpression { line: usize, message: String },

    #[error("Undefined variable: {0}")]
    UndefinedVariable(String),

    #[error("Environment variable not set: {0}")]
    EnvVarNotSet(String),

    #[error("'{0}' is already bound")]
    DuplicateBinding(String),

    #[error("Resource '{0}' cannot be used as a value; reference one of its attributes instead")]
    BindingAsValue(String),

    #[error("Only one backend block is allowed")]
    DuplicateBackend,

    #[error("Malformed {0}")]
    Malformed(&'static str),
}

/// Attribute block shared by `backend` and `provider` declarations
pub trait BlockAttributes {
    fn attributes(&self) -> &HashMap<String, Value>;

    /// Get a string attribute value
    fn get_string(&self, key: &str) -> Option<&str> {
        self.attributes().get(key).and_then(Value::as_str)
    }

    /// Get a boolean attribute value
    fn get_bool(&self, key: &str) -> Option<bool> {
        self.attributes().get(key).and_then(Value::as_bool)
    }

    /// Get an integer attribute value
    fn get_int(&self, key: &str) -> Option<i64> {
        self.attributes().get(key).and_then(Value::as_int)
    }
}

/// Provider configuration
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub name: String,
    pub attributes: HashMap<String, Value>,
}

impl BlockAttributes for ProviderConfig {
    fn attributes(&self) -> &HashMap<String, Value> {
        &self.attributes
    }
}

/// Backend configuration for state storage
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Backend type (e.g., "local")
    pub backend_type: String,
    /// Backend-specific attributes
    pub attributes: HashMap<String, Value>,
}

impl BlockAttributes for BackendConfig {
    fn attributes(&self) -> &HashMap<String, Value> {
        &self.attributes
    }
}

/// Parse result
#[derive(Debug, Clone, Default)]
pub struct ParsedFile {
    pub providers: Vec<ProviderConfig>,
    /// Resources in declaration order
    pub resources: Vec<ResourceSpec>,
    pub variables: HashMap<String, Value>,
    /// Backend configuration for state storage
    pub backend: Option<BackendConfig>,
}

impl ParsedFile {
    /// Merge another file into this one (files of one directory share a namespace for resources)
    pub fn merge(&mut self, other: ParsedFile) -> Result<(), ParseError> {
        if other.backend.is_some() {
            if self.backend.is_some() {
                return Err(ParseError::DuplicateBackend);
            }
            self.backend = other.backend;
        }
        self.providers.extend(other.providers);
        self.resources.extend(other.resources);
        self.variables.extend(other.variables);
        Ok(())
    }

    pub fn provider(&self, name: &str) -> Option<&ProviderConfig> {
        self.providers.iter().find(|p| p.name == name)
    }
}

/// Parse context (variable scope)
#[derive(Default)]
struct ParseContext {
    variables: HashMap<String, Value>,
    /// Names bound to resources so far
    resource_bindings: HashSet<String>,
}

impl ParseContext {
    fn is_bound(&self, name: &str) -> bool {
        self.variables.contains_key(name) || self.resource_bindings.contains(name)
    }
}

/// Parse a .sta file
pub fn parse(input: &str) -> Result<ParsedFile, ParseError> {
    let mut pairs = StrataParser::parse(Rule::file, input)?;
    let file = next_pair(&mut pairs, "file")?;

    let mut ctx = ParseContext::default();
    let mut parsed = ParsedFile::default();

    for statement in file.into_inner() {
        if statement.as_rule() != Rule::statement {
            continue;
        }
        let stmt = next_pair(&mut statement.into_inner(), "statement")?;
        match stmt.as_rule() {
            Rule::backend_block => {
                if parsed.backend.is_some() {
                    return Err(ParseError::DuplicateBackend);
                }
                let (backend_type, attributes) = parse_named_block(stmt, &ctx)?;
                parsed.backend = Some(BackendConfig {
                    backend_type,
                    attributes,
                });
            }
            Rule::provider_block => {
                let (name, attributes) = parse_named_block(stmt, &ctx)?;
                parsed.providers.push(ProviderConfig { name, attributes });
            }
            Rule::let_binding => parse_let_binding(stmt, &mut ctx, &mut parsed)?,
            _ => {}
        }
    }

    parsed.variables = ctx.variables;
    Ok(parsed)
}

fn next_pair<'i>(pairs: &mut Pairs<'i, Rule>, what: &'static str) -> Result<Pair<'i, Rule>, ParseError> {
    pairs.next().ok_or(ParseError::Malformed(what))
}

fn line_of(pair: &Pair<'_, Rule>) -> usize {
    pair.as_span().start_pos().line_col().0
}

/// Parse `backend <type> { ... }` or `provider <name> { ... }`
fn parse_named_block(
    pair: Pair<'_, Rule>,
    ctx: &ParseContext,
) -> Result<(String, HashMap<String, Value>), ParseError> {
    let mut inner = pair.into_inner();
    let name = next_pair(&mut inner, "block name")?.as_str().to_string();

    let mut attributes = HashMap::new();
    for attr in inner {
        let (key, expr) = split_attribute(attr)?;
        attributes.insert(key, parse_expression(expr, ctx)?);
    }
    Ok((name, attributes))
}

fn split_attribute(pair: Pair<'_, Rule>) -> Result<(String, Pair<'_, Rule>), ParseError> {
    let mut inner = pair.into_inner();
    let key = next_pair(&mut inner, "attribute name")?.as_str().to_string();
    let expr = next_pair(&mut inner, "attribute value")?;
    Ok((key, expr))
}

fn parse_let_binding(
    pair: Pair<'_, Rule>,
    ctx: &mut ParseContext,
    parsed: &mut ParsedFile,
) -> Result<(), ParseError> {
    let mut inner = pair.into_inner();
    next_pair(&mut inner, "let keyword")?;
    let name = next_pair(&mut inner, "binding name")?.as_str().to_string();
    let rhs = next_pair(&mut inner, "binding value")?;

    if ctx.is_bound(&name) {
        return Err(ParseError::DuplicateBinding(name));
    }

    match rhs.as_rule() {
        Rule::resource_expr => {
            let spec = parse_resource_expr(rhs, &name, ctx)?;
            ctx.resource_bindings.insert(name);
            parsed.resources.push(spec);
        }
        _ => {
            let value = parse_expression(rhs, ctx)?;
            ctx.variables.insert(name, value);
        }
    }
    Ok(())
}

fn parse_resource_expr(
    pair: Pair<'_, Rule>,
    name: &str,
    ctx: &ParseContext,
) -> Result<ResourceSpec, ParseError> {
    let mut inner = pair.into_inner();
    let resource_type = next_pair(&mut inner, "resource type")?.as_str();
    let mut spec = ResourceSpec::new(resource_type, name);

    for attr in inner {
        let line = line_of(&attr);
        let (key, expr) = split_attribute(attr)?;
        match key.as_str() {
            "depends_on" => spec.depends_on = parse_depends_on(expr)?,
            "lifecycle" => spec.lifecycle = parse_lifecycle(expr, ctx)?,
            _ => {
                let value = parse_expression(expr, ctx)?;
                if spec.attributes.insert(key.clone(), value).is_some() {
                    return Err(ParseError::InvalidExpression {
                        line,
                        message: format!("attribute '{}' is set twice on '{}'", key, name),
                    });
                }
            }
        }
    }

    Ok(spec)
}

/// `depends_on = [vpc, sg]`; an attribute reference such as `vpc.id` names its resource
fn parse_depends_on(pair: Pair<'_, Rule>) -> Result<Vec<String>, ParseError> {
    let line = line_of(&pair);
    let list = next_pair(&mut pair.into_inner(), "depends_on")?;
    if list.as_rule() != Rule::list {
        return Err(ParseError::InvalidExpression {
            line,
            message: "depends_on must be a list of resource names".to_string(),
        });
    }

    let mut targets = Vec::new();
    for item in list.into_inner() {
        let item = next_pair(&mut item.into_inner(), "depends_on item")?;
        match item.as_rule() {
            Rule::variable => targets.push(item.as_str().to_string()),
            Rule::reference => {
                let target = next_pair(&mut item.into_inner(), "reference target")?;
                targets.push(target.as_str().to_string());
            }
            _ => {
                return Err(ParseError::InvalidExpression {
                    line,
                    message: format!("'{}' is not a resource name", item.as_str()),
                });
            }
        }
    }
    Ok(targets)
}

fn parse_lifecycle(pair: Pair<'_, Rule>, ctx: &ParseContext) -> Result<Lifecycle, ParseError> {
    let line = line_of(&pair);
    let invalid = |message: String| ParseError::InvalidExpression { line, message };

    let Value::Map(map) = parse_expression(pair, ctx)? else {
        return Err(invalid("lifecycle must be a map".to_string()));
    };

    let mut lifecycle = Lifecycle::default();
    for (key, value) in map {
        match (key.as_str(), value) {
            ("prevent_destroy", Value::Bool(b)) => lifecycle.prevent_destroy = b,
            ("ignore_changes", Value::List(items)) => {
                for item in items {
                    match item {
                        Value::String(s) => lifecycle.ignore_changes.push(s),
                        other => {
                            return Err(invalid(format!(
                                "ignore_changes entries must be strings, got {}",
                                other
                            )));
                        }
                    }
                }
            }
            (key, value) => {
                return Err(invalid(format!(
                    "unsupported lifecycle setting {} = {}",
                    key, value
                )));
            }
        }
    }
    Ok(lifecycle)
}

/// Parse an expression into a value
fn parse_expression(pair: Pair<'_, Rule>, ctx: &ParseContext) -> Result<Value, ParseError> {
    let line = line_of(&pair);
    let inner = next_pair(&mut pair.into_inner(), "expression")?;

    match inner.as_rule() {
        Rule::list => inner
            .into_inner()
            .map(|item| parse_expression(item, ctx))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::List),
        Rule::map => {
            let mut map = BTreeMap::new();
            for attr in inner.into_inner() {
                let (key, expr) = split_attribute(attr)?;
                map.insert(key, parse_expression(expr, ctx)?);
            }
            Ok(Value::Map(map))
        }
        Rule::string => Ok(Value::String(parse_string(inner)?)),
        Rule::number => inner
            .as_str()
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|e| ParseError::InvalidExpression {
                line,
                message: format!("invalid integer '{}': {}", inner.as_str(), e),
            }),
        Rule::boolean => Ok(Value::Bool(inner.as_str() == "true")),
        Rule::env_call => {
            let var = parse_string(next_pair(&mut inner.into_inner(), "env argument")?)?;
            env::var(&var)
                .map(Value::String)
                .map_err(|_| ParseError::EnvVarNotSet(var))
        }
        Rule::reference => {
            let mut parts = inner.into_inner();
            let target = next_pair(&mut parts, "reference target")?.as_str();
            let attribute = next_pair(&mut parts, "reference attribute")?.as_str();

            match ctx.variables.get(target) {
                Some(Value::Map(map)) => map.get(attribute).cloned().ok_or_else(|| {
                    ParseError::InvalidExpression {
                        line,
                        message: format!("variable '{}' has no key '{}'", target, attribute),
                    }
                }),
                Some(other) => Err(ParseError::InvalidExpression {
                    line,
                    message: format!("variable '{}' is {}, not a map", target, other.type_name()),
                }),
                None => Ok(Value::reference(target, attribute)),
            }
        }
        Rule::variable => {
            let name = inner.as_str();
            if let Some(value) = ctx.variables.get(name) {
                Ok(value.clone())
            } else if ctx.resource_bindings.contains(name) {
                Err(ParseError::BindingAsValue(name.to_string()))
            } else {
                Err(ParseError::UndefinedVariable(name.to_string()))
            }
        }
        _ => Err(ParseError::Malformed("expression")),
    }
}

/// Parse a string literal, processing escapes
fn parse_string(pair: Pair<'_, Rule>) -> Result<String, ParseError> {
    let raw = next_pair(&mut pair.into_inner(), "string")?.as_str();

    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some(other) => out.push(other),
            None => return Err(ParseError::Malformed("string escape")),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::Reference;

    #[test]
    fn parse_resource_with_references() {
        let input = r#"
            let vpc = sandbox.vpc {
              cidr_block = "10.0.0.0/16"
            }

            let subnet = sandbox.subnet {
              vpc_id     = vpc.id
              cidr_block = "10.0.1.0/24"
            }
        "#;

        let parsed = parse(input).unwrap();
        assert_eq!(parsed.resources.len(), 2);

        let subnet = &parsed.resources[1];
        assert_eq!(subnet.id.resource_type, "sandbox.subnet");
        assert_eq!(subnet.id.name, "subnet");
        assert_eq!(
            subnet.attributes.get("vpc_id"),
            Some(&Value::Ref(Reference::new("vpc", "id")))
        );
    }

    #[test]
    fn parse_backend_and_provider_blocks() {
        let input = r#"
            backend local {
              path = "state/strata.json"
            }
            provider sandbox {
              latency_ms = 5
            }
        "#;

        let parsed = parse(input).unwrap();
        let backend = parsed.backend.unwrap();
        assert_eq!(backend.backend_type, "local");
        assert_eq!(backend.get_string("path"), Some("state/strata.json"));
        assert_eq!(parsed.providers[0].get_int("latency_ms"), Some(5));
    }

    #[test]
    fn variables_are_substituted() {
        let input = r#"
            let cidr = "10.0.0.0/16"
            let tags = { team = "web", tier = "front" }
            let vpc = sandbox.vpc {
              cidr_block = cidr
              tags = tags
              owner = tags.team
            }
        "#;

        let parsed = parse(input).unwrap();
        let vpc = &parsed.resources[0];
        assert_eq!(vpc.attributes["cidr_block"], Value::string("10.0.0.0/16"));
        assert_eq!(vpc.attributes["owner"], Value::string("web"));
        assert!(matches!(vpc.attributes["tags"], Value::Map(_)));
    }

    #[test]
    fn parse_lists_numbers_and_booleans() {
        let input = r#"
            let sg = sandbox.security_group {
              name = "web"
              ingress = [{ port = 80, protocol = "tcp" }, { port = -1, protocol = "icmp" }]
              open = false
            }
        "#;

        let parsed = parse(input).unwrap();
        let sg = &parsed.resources[0];
        let Value::List(rules) = &sg.attributes["ingress"] else {
            panic!("expected list");
        };
        assert_eq!(rules.len(), 2);
        let Value::Map(second) = &rules[1] else {
            panic!("expected map");
        };
        assert_eq!(second["port"], Value::Int(-1));
        assert_eq!(sg.attributes["open"], Value::Bool(false));
    }

    #[test]
    fn depends_on_and_lifecycle_are_meta_attributes() {
        let input = r#"
            let role = sandbox.iam_role {
              name = "task"
              lifecycle = { prevent_destroy = true, ignore_changes = ["description"] }
            }
            let cluster = sandbox.ecs_cluster {
              name = "app"
              depends_on = [role]
            }
        "#;

        let parsed = parse(input).unwrap();
        let role = &parsed.resources[0];
        assert!(role.lifecycle.prevent_destroy);
        assert_eq!(role.lifecycle.ignore_changes, vec!["description".to_string()]);
        assert!(!role.attributes.contains_key("lifecycle"));

        let cluster = &parsed.resources[1];
        assert_eq!(cluster.depends_on, vec!["role".to_string()]);
        assert!(!cluster.attributes.contains_key("depends_on"));
    }

    #[test]
    fn string_escapes_and_comments() {
        let input = r#"
            # a comment
            let policy = "{\"Version\": \"2012-10-17\"}" // trailing comment
        "#;

        let parsed = parse(input).unwrap();
        assert_eq!(
            parsed.variables["policy"],
            Value::string(r#"{"Version": "2012-10-17"}"#)
        );
    }

    #[test]
    fn undefined_variable_is_an_error() {
        let input = r#"
            let vpc = sandbox.vpc {
              cidr_block = missing
            }
        "#;
        assert!(matches!(
            parse(input),
            Err(ParseError::UndefinedVariable(name)) if name == "missing"
        ));
    }

    #[test]
    fn duplicate_binding_is_an_error() {
        let input = r#"
            let vpc = sandbox.vpc { cidr_block = "10.0.0.0/16" }
            let vpc = sandbox.vpc { cidr_block = "10.1.0.0/16" }
        "#;
        assert!(matches!(parse(input), Err(ParseError::DuplicateBinding(_))));
    }

    #[test]
    fn resource_binding_cannot_be_a_bare_value() {
        let input = r#"
            let vpc = sandbox.vpc { cidr_block = "10.0.0.0/16" }
            let subnet = sandbox.subnet { vpc_id = vpc }
        "#;
        assert!(matches!(parse(input), Err(ParseError::BindingAsValue(_))));
    }

    #[test]
    fn env_call_reads_environment() {
        // SAFETY: test-local variable name, not read concurrently elsewhere
        unsafe { env::set_var("STRATA_PARSER_TEST_STAGE", "prod") };
        let parsed = parse(r#"let stage = env("STRATA_PARSER_TEST_STAGE")"#).unwrap();
        assert_eq!(parsed.variables["stage"], Value::string("prod"));

        assert!(matches!(
            parse(r#"let stage = env("STRATA_PARSER_TEST_UNSET_VAR")"#),
            Err(ParseError::EnvVarNotSet(_))
        ));
    }

    #[test]
    fn let_keyword_needs_a_separator() {
        assert!(parse(r#"letvpc = "x""#).is_err());
    }

    #[test]
    fn syntax_error_is_reported() {
        assert!(matches!(
            parse("let vpc = sandbox.vpc { cidr_block = }"),
            Err(ParseError::Syntax(_))
        ));
    }
}
