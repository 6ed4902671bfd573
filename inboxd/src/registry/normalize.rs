use serde_json::{Number, Value};
use shared::types::{value_to_string, ConfigDescriptionParameter, ParameterType};

/// Brings a raw property value into the shape a configuration parameter expects.
pub trait ConfigNormalizer: Send + Sync {
    fn normalize(&self, value: &Value, parameter: Option<&ConfigDescriptionParameter>) -> Value;
}

/// Converts by declared parameter type. Without a descriptor the value's own
/// type is kept, except numeric strings stay strings.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultNormalizer;

impl ConfigNormalizer for DefaultNormalizer {
    fn normalize(&self, value: &Value, parameter: Option<&ConfigDescriptionParameter>) -> Value {
        let Some(parameter) = parameter else {
            return value.clone();
        };
        let converted = match parameter.parameter_type {
            ParameterType::Text => Some(Value::String(value_to_string(value))),
            ParameterType::Integer => as_integer(value).map(Value::from),
            ParameterType::Decimal => as_decimal(value).and_then(Number::from_f64).map(Value::Number),
            ParameterType::Boolean => as_boolean(value).map(Value::Bool),
        };
        converted.unwrap_or_else(|| {
            tracing::debug!(
                "Cannot normalize {} for parameter '{}' of type {:?}",
                value,
                parameter.name,
                parameter.parameter_type
            );
            value.clone()
        })
    }
}

fn as_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_decimal(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_boolean(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => s.trim().to_ascii_lowercase().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn param(parameter_type: ParameterType) -> ConfigDescriptionParameter {
        ConfigDescriptionParameter {
            name: "foo".to_string(),
            parameter_type,
        }
    }

    #[test]
    fn test_text_parameter_stringifies_numbers() {
        let n = DefaultNormalizer;
        assert_eq!(n.normalize(&json!(3), Some(&param(ParameterType::Text))), json!("3"));
        assert_eq!(n.normalize(&json!("x"), Some(&param(ParameterType::Text))), json!("x"));
    }

    #[test]
    fn test_numeric_parameters_parse_strings() {
        let n = DefaultNormalizer;
        assert_eq!(n.normalize(&json!("42"), Some(&param(ParameterType::Integer))), json!(42));
        assert_eq!(n.normalize(&json!("1.5"), Some(&param(ParameterType::Decimal))), json!(1.5));
        assert_eq!(n.normalize(&json!("TRUE"), Some(&param(ParameterType::Boolean))), json!(true));
    }

    #[test]
    fn test_unconvertible_value_is_kept() {
        let n = DefaultNormalizer;
        assert_eq!(n.normalize(&json!("abc"), Some(&param(ParameterType::Integer))), json!("abc"));
    }

    #[test]
    fn test_no_descriptor_keeps_value() {
        let n = DefaultNormalizer;
        assert_eq!(n.normalize(&json!(3), None), json!(3));
        assert_eq!(n.normalize(&json!("3"), None), json!("3"));
    }
}
