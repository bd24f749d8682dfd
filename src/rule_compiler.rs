//! Splits a [`Rule`] into a server-side query fragment and a residual
//! client-side predicate, per the field/operator table in SPEC_FULL §4.3.

use crate::models::{Action, Condition, Conjunction, Field, MatchableEmail, Operator, Rule};

/// Result of compiling a rule: the query to hand the provider (if any),
/// and whether message details / body content must be fetched to finish
/// evaluating it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CompiledRule {
    pub server_query: Option<String>,
    pub needs_details: bool,
    pub needs_body: bool,
}

/// Translate a single condition into a Gmail query fragment, if the
/// field/operator combination is one the provider understands natively.
fn translate_condition(condition: &Condition) -> Option<String> {
    let value = condition.value.as_str();
    match (condition.field, condition.operator) {
        (Field::From, Operator::Contains) => Some(format!("from:{value}")),
        (Field::From, Operator::Equals) => Some(format!("from:({value})")),
        (Field::From, Operator::NotContains) | (Field::From, Operator::NotEquals) => {
            Some(format!("-from:{value}"))
        }

        (Field::To, Operator::Contains) => Some(format!("to:{value}")),
        (Field::To, Operator::Equals) => Some(format!("to:({value})")),
        (Field::To, Operator::NotContains) | (Field::To, Operator::NotEquals) => {
            Some(format!("-to:{value}"))
        }

        (Field::Subject, Operator::Contains) => Some(quote_if_spaced("subject", value, false)),
        (Field::Subject, Operator::Equals) => Some(format!("subject:(\"{value}\")")),
        (Field::Subject, Operator::NotContains) | (Field::Subject, Operator::NotEquals) => {
            Some(quote_if_spaced("subject", value, true))
        }

        (Field::Label, Operator::Contains) => Some(format!("label:{value}")),
        (Field::Label, Operator::NotContains) => Some(format!("-label:{value}")),

        (Field::DateAge, Operator::OlderThan) if is_valid_age(value) => {
            Some(format!("older_than:{value}"))
        }
        (Field::DateAge, Operator::NewerThan) if is_valid_age(value) => {
            Some(format!("newer_than:{value}"))
        }

        (Field::HasAttachment, Operator::Is) => match value.to_ascii_lowercase().as_str() {
            "true" => Some("has:attachment".to_string()),
            "false" => Some("-has:attachment".to_string()),
            _ => None,
        },

        (Field::AttachmentFilename, Operator::Contains)
        | (Field::AttachmentFilename, Operator::Equals) => {
            Some(quote_if_spaced("filename", value, false))
        }
        (Field::AttachmentFilename, Operator::NotContains)
        | (Field::AttachmentFilename, Operator::NotEquals) => {
            Some(quote_if_spaced("filename", value, true))
        }

        (Field::MessageSize, Operator::GreaterThan) if is_valid_size(value) => {
            Some(format!("larger:{value}"))
        }
        (Field::MessageSize, Operator::LessThan) if is_valid_size(value) => {
            Some(format!("smaller:{value}"))
        }

        _ => None,
    }
}

fn quote_if_spaced(operator_name: &str, value: &str, negate: bool) -> String {
    let prefix = if negate { "-" } else { "" };
    if value.contains(' ') {
        format!("{prefix}{operator_name}:(\"{value}\")")
    } else {
        format!("{prefix}{operator_name}:{value}")
    }
}

fn is_valid_age(value: &str) -> bool {
    if value.len() < 2 {
        return false;
    }
    let (digits, unit) = value.split_at(value.len() - 1);
    !digits.is_empty()
        && digits.chars().all(|c| c.is_ascii_digit())
        && matches!(unit, "d" | "m" | "y")
}

fn is_valid_size(value: &str) -> bool {
    if value.chars().all(|c| c.is_ascii_digit()) && !value.is_empty() {
        return true;
    }
    if value.len() < 2 {
        return false;
    }
    let (digits, unit) = value.split_at(value.len() - 1);
    !digits.is_empty()
        && digits.chars().all(|c| c.is_ascii_digit())
        && matches!(unit.to_ascii_uppercase().as_str(), "K" | "M")
}

/// Whether this single condition is one the compiler knows how to push
/// down to the server query in full.
fn is_translatable(condition: &Condition) -> bool {
    translate_condition(condition).is_some()
        && !matches!(condition.field, Field::Body | Field::BodySnippet)
}

/// Compile a rule into its server query and detail-fetch requirements.
///
/// If every condition translates, the query is complete and
/// `needs_details` is false: the server query alone decides membership.
/// Otherwise the query contains only the translatable fragments (or is
/// absent) and `needs_details` is true, so the executor must fetch
/// message details and run [`evaluate`] against every candidate.
pub fn compile(rule: &Rule) -> CompiledRule {
    if rule.conditions.is_empty() {
        return CompiledRule::default();
    }

    let needs_body = rule
        .conditions
        .iter()
        .any(|c| matches!(c.field, Field::Body | Field::BodySnippet));

    let all_translatable = rule.conditions.iter().all(is_translatable);
    let or_with_gap = rule.conditions.len() > 1
        && rule.conjunction == Conjunction::Or
        && !all_translatable;

    let fragments: Vec<String> = rule
        .conditions
        .iter()
        .filter_map(translate_condition)
        .collect();

    let server_query = if fragments.is_empty() {
        None
    } else {
        let sep = match rule.conjunction {
            Conjunction::And => " ",
            Conjunction::Or => " OR ",
        };
        Some(fragments.join(sep))
    };

    let needs_details = !all_translatable || or_with_gap;

    CompiledRule {
        server_query,
        needs_details,
        needs_body,
    }
}

fn field_value<'a>(email: &'a MatchableEmail, field: Field) -> Option<&'a str> {
    match field {
        Field::From => Some(email.from.as_str()),
        Field::To => Some(email.to.as_str()),
        Field::Subject => Some(email.subject.as_str()),
        Field::BodySnippet => Some(email.body_snippet.as_str()),
        Field::Body => email.body.as_deref(),
        _ => None,
    }
}

fn condition_matches(email: &MatchableEmail, condition: &Condition) -> bool {
    let value_lower = condition.value.to_ascii_lowercase();

    if condition.field == Field::Label {
        return match condition.operator {
            Operator::Contains => email.labels.iter().any(|l| l.eq_ignore_ascii_case(&condition.value)),
            Operator::NotContains => !email.labels.iter().any(|l| l.eq_ignore_ascii_case(&condition.value)),
            _ => false,
        };
    }

    if condition.field == Field::HasAttachment {
        let expected = value_lower == "true";
        return condition.operator == Operator::Is && email.has_attachment == Some(expected);
    }

    if condition.field == Field::AttachmentFilename {
        let hay = email
            .attachment_filenames
            .iter()
            .map(|f| f.to_ascii_lowercase())
            .collect::<Vec<_>>();
        return match condition.operator {
            Operator::Contains => hay.iter().any(|f| f.contains(&value_lower)),
            Operator::NotContains => !hay.iter().any(|f| f.contains(&value_lower)),
            Operator::Equals => hay.iter().any(|f| f == &value_lower),
            Operator::NotEquals => !hay.iter().any(|f| f == &value_lower),
            _ => false,
        };
    }

    if condition.field == Field::MessageSize {
        return false; // size comparisons are server-only; see DESIGN.md.
    }

    if condition.field == Field::DateAge {
        return false; // age comparisons are server-only; see DESIGN.md.
    }

    let Some(field_val) = field_value(email, condition.field) else {
        return false;
    };
    let field_val_lower = field_val.to_ascii_lowercase();

    match condition.operator {
        Operator::Contains => field_val_lower.contains(&value_lower),
        Operator::NotContains => !field_val_lower.contains(&value_lower),
        Operator::Equals => field_val_lower == value_lower,
        Operator::NotEquals => field_val_lower != value_lower,
        Operator::StartsWith => field_val_lower.starts_with(&value_lower),
        Operator::EndsWith => field_val_lower.ends_with(&value_lower),
        _ => false,
    }
}

/// Evaluate a rule's residual client-side predicate against a derived
/// email. Empty condition lists never match, matching the save-time
/// invariant that a conditionless rule is inert rather than universal.
pub fn evaluate(rule: &Rule, email: &MatchableEmail) -> bool {
    if !rule.enabled || rule.conditions.is_empty() {
        return false;
    }

    let matches: Vec<bool> = rule
        .conditions
        .iter()
        .map(|c| condition_matches(email, c))
        .collect();

    match rule.conjunction {
        Conjunction::And => matches.iter().all(|m| *m),
        Conjunction::Or => matches.iter().any(|m| *m),
    }
}

/// Actions with missing required parameters produce no key and are
/// skipped with a warning by the caller (see `pipeline::execute_rule`).
pub fn usable_actions(actions: &[Action]) -> impl Iterator<Item = (&Action, String)> {
    actions.iter().filter_map(|a| a.key().map(|k| (a, k)))
}
