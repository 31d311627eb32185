//! Placeholder expressions: `@{name}` macros bound against a [`ServiceContext`].
//!
//! # Syntax
//!
//! An expression is `@{name}`, optionally followed by `:` and a value
//! segment. Names are case-insensitive; the value segment is kept verbatim.
//! The value segment is only accepted by the custom status message macro:
//!
//! ```text
//! @{custom_status_msg}:{S=OK;F=Failed}
//! ```
//!
//! which resolves to the text mapped to the context's current status code,
//! or to the status name (e.g. `IN_PROCESS`) when no entry matches.

use std::collections::HashMap;

use chrono::{DateTime, Local};

use crate::context::ServiceContext;
use crate::error::ExpressionError;
use crate::process_code::ProcessCode;

const PREFIX: &str = "@{";
const SUFFIX: &str = "}";

/// Name of the custom status message macro.
pub const CUSTOM_STATUS_MSG: &str = "custom_status_msg";

/// Normalizes an expression: trims it, lower-cases the name part and keeps
/// the value segment (after the first `:`) as written.
///
/// # Errors
///
/// Returns [`ExpressionError::Malformed`] if the name part is not wrapped in
/// `@{` and `}` or is empty.
pub fn to_seamless(expr: &str) -> Result<String, ExpressionError> {
    let (name, value) = split(expr)?;
    Ok(match value {
        Some(value) => format!("{PREFIX}{name}{SUFFIX}:{value}"),
        None => format!("{PREFIX}{name}{SUFFIX}"),
    })
}

/// Splits an expression into its lower-cased bare name and optional value.
fn split(expr: &str) -> Result<(String, Option<&str>), ExpressionError> {
    let trimmed = expr.trim();
    let (name_part, value) = match trimmed.split_once(':') {
        Some((name, value)) => (name.trim(), Some(value)),
        None => (trimmed, None),
    };
    let inner = name_part
        .strip_prefix(PREFIX)
        .and_then(|rest| rest.strip_suffix(SUFFIX))
        .ok_or_else(|| ExpressionError::Malformed {
            expr: expr.to_string(),
            reason: "name must be wrapped in @{ and }",
        })?;
    let inner = inner.trim();
    if inner.is_empty() || inner.contains(['{', '}']) {
        return Err(ExpressionError::Malformed {
            expr: expr.to_string(),
            reason: "empty or nested macro name",
        });
    }
    Ok((inner.to_lowercase(), value))
}

/// Parses `{code=text;code=text}` into a table keyed by status.
///
/// # Errors
///
/// A segment without exactly one `=` is [`ExpressionError::MalformedOption`];
/// an unknown status code is [`ExpressionError::UnknownStatusCode`].
pub fn parse_status_options(options: &str) -> Result<HashMap<ProcessCode, String>, ExpressionError> {
    let trimmed = options.trim();
    let body = trimmed
        .strip_prefix('{')
        .and_then(|rest| rest.strip_suffix('}'))
        .unwrap_or(trimmed);

    let mut table = HashMap::new();
    for option in body.split(';') {
        if option.trim().is_empty() {
            continue;
        }
        let mut parts = option.split('=');
        let (Some(code), Some(text), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(ExpressionError::MalformedOption {
                option: option.to_string(),
            });
        };
        let code = code.trim();
        let status = ProcessCode::from_code(code).ok_or_else(|| ExpressionError::UnknownStatusCode {
            code: code.to_string(),
        })?;
        table.insert(status, text.to_string());
    }
    Ok(table)
}

/// What a macro name resolves to.
#[derive(Clone, Copy)]
pub enum Macro {
    /// Zero-argument accessor on the context. `None` resolves to `None`.
    Accessor(fn(&ServiceContext) -> Option<String>),
    /// Value computed from the current time only.
    Computed(fn(&DateTime<Local>) -> String),
    /// The custom status message form.
    StatusMessage,
}

impl std::fmt::Debug for Macro {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Macro::Accessor(_) => f.write_str("Accessor"),
            Macro::Computed(_) => f.write_str("Computed"),
            Macro::StatusMessage => f.write_str("StatusMessage"),
        }
    }
}

/// Pluggable mapping from expressions to values.
pub trait ExpressionResolver: Send + Sync {
    /// Resolves a single expression against `ctx`.
    ///
    /// # Errors
    ///
    /// Parsing errors and unknown macro names.
    fn resolve(&self, expr: &str, ctx: &ServiceContext) -> Result<Option<String>, ExpressionError>;
}

/// Default resolver backed by an explicit name-to-[`Macro`] table.
#[derive(Debug, Clone)]
pub struct MacroResolver {
    macros: HashMap<String, Macro>,
}

impl MacroResolver {
    /// Creates a resolver with the built-in macros.
    #[must_use]
    pub fn new() -> Self {
        let mut resolver = Self {
            macros: HashMap::new(),
        };
        resolver.register("tx_id", Macro::Accessor(|ctx| Some(ctx.tx_id().to_string())));
        resolver.register("if_id", Macro::Accessor(|ctx| Some(ctx.interface_id().to_string())));
        resolver.register(
            "service_trace",
            Macro::Accessor(|ctx| Some(ctx.service_trace_message())),
        );
        resolver.register(
            "error_trace",
            Macro::Accessor(|ctx| ctx.has_error().then(|| ctx.error_trace_message())),
        );
        resolver.register(
            "last_error",
            Macro::Accessor(|ctx| ctx.error_trace().last().map(|e| format!("{:#}", e.error))),
        );
        resolver.register(
            "status",
            Macro::Accessor(|ctx| Some(ctx.process_code().to_string())),
        );
        resolver.register(
            "status_code",
            Macro::Accessor(|ctx| Some(ctx.process_code().code().to_string())),
        );
        resolver.register(
            "created",
            Macro::Accessor(|ctx| Some(ctx.created_at().format("%Y%m%d%H%M%S%3f").to_string())),
        );
        resolver.register("date", Macro::Computed(|now| now.format("%Y%m%d").to_string()));
        resolver.register("time", Macro::Computed(|now| now.format("%H%M%S").to_string()));
        resolver.register(
            "datetime",
            Macro::Computed(|now| now.format("%Y%m%d%H%M%S").to_string()),
        );
        resolver.register(
            "timestamp",
            Macro::Computed(|now| now.format("%Y%m%d%H%M%S%3f").to_string()),
        );
        resolver.register(
            "iso_datetime",
            Macro::Computed(|now| now.format("%Y-%m-%dT%H:%M:%S%.3f").to_string()),
        );
        resolver.register(CUSTOM_STATUS_MSG, Macro::StatusMessage);
        resolver
    }

    /// Adds or replaces a macro. The name is matched case-insensitively.
    pub fn register(&mut self, name: &str, value: Macro) {
        self.macros.insert(name.to_lowercase(), value);
    }

    /// Replaces every `@{name}` occurrence in `template` with its resolved
    /// value. Macros resolving to `None` are replaced by an empty string.
    ///
    /// # Errors
    ///
    /// Unterminated or unknown macros, and macros that require a value segment.
    pub fn interpolate(&self, template: &str, ctx: &ServiceContext) -> Result<String, ExpressionError> {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;
        while let Some(start) = rest.find(PREFIX) {
            out.push_str(&rest[..start]);
            let after = &rest[start..];
            let end = after.find(SUFFIX).ok_or_else(|| ExpressionError::Malformed {
                expr: after.to_string(),
                reason: "unterminated macro",
            })?;
            let expr = &after[..=end];
            if let Some(value) = self.resolve(expr, ctx)? {
                out.push_str(&value);
            }
            rest = &after[end + 1..];
        }
        out.push_str(rest);
        Ok(out)
    }
}

impl Default for MacroResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl ExpressionResolver for MacroResolver {
    fn resolve(&self, expr: &str, ctx: &ServiceContext) -> Result<Option<String>, ExpressionError> {
        let (name, value) = split(expr)?;
        let entry = self
            .macros
            .get(&name)
            .ok_or_else(|| ExpressionError::UnknownMacro { name: name.clone() })?;

        match (entry, value) {
            (Macro::StatusMessage, Some(options)) => {
                let table = parse_status_options(options)?;
                let status = ctx.process_code();
                Ok(Some(
                    table
                        .get(&status)
                        .cloned()
                        .unwrap_or_else(|| status.to_string()),
                ))
            }
            (Macro::StatusMessage, None) => Err(ExpressionError::Malformed {
                expr: expr.to_string(),
                reason: "custom status message requires a value segment",
            }),
            (_, Some(_)) => Err(ExpressionError::Malformed {
                expr: expr.to_string(),
                reason: "value segment is only allowed for custom_status_msg",
            }),
            (Macro::Accessor(accessor), None) => Ok(accessor(ctx)),
            (Macro::Computed(compute), None) => Ok(Some(compute(&Local::now()))),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::interface::InterfaceDefinition;

    fn ctx() -> ServiceContext {
        ServiceContext::new(Arc::new(InterfaceDefinition::new("IF200", "main")))
    }

    #[test]
    fn to_seamless_trims_and_lowercases() {
        assert_eq!(to_seamless("  @{TX_ID} ").unwrap(), "@{tx_id}");
    }

    #[test]
    fn to_seamless_preserves_value_case() {
        assert_eq!(
            to_seamless(" @{Custom_Status_Msg}:{S=OK;F=Failed}").unwrap(),
            "@{custom_status_msg}:{S=OK;F=Failed}"
        );
    }

    #[test]
    fn to_seamless_rejects_unwrapped_names() {
        for bad in ["tx_id", "@{tx_id", "{tx_id}", "@{}", ""] {
            assert!(
                matches!(to_seamless(bad), Err(ExpressionError::Malformed { .. })),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn resolves_accessors() {
        let resolver = MacroResolver::new();
        let mut ctx = ctx();
        assert_eq!(
            resolver.resolve("@{TX_ID}", &ctx).unwrap().as_deref(),
            Some(ctx.tx_id())
        );
        assert_eq!(resolver.resolve("@{if_id}", &ctx).unwrap().as_deref(), Some("IF200"));
        assert_eq!(resolver.resolve("@{error_trace}", &ctx).unwrap(), None);

        ctx.set_process_code(ProcessCode::InProcess);
        assert_eq!(
            resolver.resolve("@{status}", &ctx).unwrap().as_deref(),
            Some("IN_PROCESS")
        );
        assert_eq!(resolver.resolve("@{status_code}", &ctx).unwrap().as_deref(), Some("P"));
    }

    #[test]
    fn resolves_computed_dates() {
        let resolver = MacroResolver::new();
        let date = resolver.resolve("@{date}", &ctx()).unwrap().unwrap();
        assert_eq!(date.len(), 8);
        assert!(date.chars().all(|c| c.is_ascii_digit()));
        let ts = resolver.resolve("@{timestamp}", &ctx()).unwrap().unwrap();
        assert_eq!(ts.len(), 17);
    }

    #[test]
    fn custom_status_message_lookup_and_fallback() {
        let resolver = MacroResolver::new();
        let mut ctx = ctx();
        let expr = "@{custom_status_msg}:{S=OK;F=Failed}";

        ctx.set_process_code(ProcessCode::Failure);
        assert_eq!(resolver.resolve(expr, &ctx).unwrap().as_deref(), Some("Failed"));

        ctx.set_process_code(ProcessCode::Success);
        assert_eq!(resolver.resolve(expr, &ctx).unwrap().as_deref(), Some("OK"));

        ctx.set_process_code(ProcessCode::ServiceNotFound);
        assert_eq!(
            resolver.resolve(expr, &ctx).unwrap().as_deref(),
            Some("SERVICE_NOT_FOUND")
        );
    }

    #[test]
    fn malformed_status_options_are_errors() {
        let resolver = MacroResolver::new();
        let ctx = ctx();
        assert!(matches!(
            resolver.resolve("@{custom_status_msg}:{S=OK;F}", &ctx),
            Err(ExpressionError::MalformedOption { .. })
        ));
        assert!(matches!(
            resolver.resolve("@{custom_status_msg}:{S=OK=1}", &ctx),
            Err(ExpressionError::MalformedOption { .. })
        ));
        assert!(matches!(
            resolver.resolve("@{custom_status_msg}:{X=unknown}", &ctx),
            Err(ExpressionError::UnknownStatusCode { .. })
        ));
        assert!(matches!(
            resolver.resolve("@{custom_status_msg}", &ctx),
            Err(ExpressionError::Malformed { .. })
        ));
    }

    #[test]
    fn value_segment_rejected_for_plain_macros() {
        let resolver = MacroResolver::new();
        assert!(matches!(
            resolver.resolve("@{tx_id}:oops", &ctx()),
            Err(ExpressionError::Malformed { .. })
        ));
    }

    #[test]
    fn unknown_macro_is_an_error() {
        let resolver = MacroResolver::new();
        assert!(matches!(
            resolver.resolve("@{nope}", &ctx()),
            Err(ExpressionError::UnknownMacro { name }) if name == "nope"
        ));
    }

    #[test]
    fn registered_macros_extend_the_table() {
        let mut resolver = MacroResolver::new();
        resolver.register("Channel", Macro::Accessor(|_| Some("ftp".to_string())));
        assert_eq!(resolver.resolve("@{channel}", &ctx()).unwrap().as_deref(), Some("ftp"));
    }

    #[test]
    fn interpolate_replaces_every_macro() {
        let resolver = MacroResolver::new();
        let ctx = ctx();
        let out = resolver
            .interpolate("insert into log values ('@{IF_ID}', '@{tx_id}', '@{error_trace}')", &ctx)
            .unwrap();
        assert_eq!(
            out,
            format!("insert into log values ('IF200', '{}', '')", ctx.tx_id())
        );
        assert_eq!(resolver.interpolate("no macros", &ctx).unwrap(), "no macros");
        assert!(resolver.interpolate("broken @{tx_id", &ctx).is_err());
    }
}
