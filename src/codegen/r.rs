use super::{Call, CodegenOptions, Dialect, Language};

/// R: a single `%>%` pipeline assigned to the model variable
#[derive(Debug, Clone, Copy, Default)]
pub struct R;

const RESERVED: [&str; 19] = [
    "if", "else", "repeat", "while", "function", "for", "next", "break", "in", "TRUE", "FALSE",
    "NULL", "Inf", "NaN", "NA", "NA_integer_", "NA_real_", "NA_character_", "NA_complex_",
];

fn is_syntactic(name: &str) -> bool {
    let mut chars = name.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
        && !RESERVED.contains(&name)
}

impl Dialect for R {
    fn language(&self) -> Language {
        Language::R
    }

    fn none(&self) -> String {
        "NULL".to_string()
    }

    fn boolean(&self, value: bool) -> String {
        let s = if value { "TRUE" } else { "FALSE" };
        s.to_string()
    }

    fn infinity(&self, negative: bool) -> String {
        let s = if negative { "-Inf" } else { "Inf" };
        s.to_string()
    }

    fn string(&self, value: &str) -> String {
        let mut escaped = String::with_capacity(value.len() + 2);
        escaped.push('"');
        for c in value.chars() {
            match c {
                '\\' => escaped.push_str("\\\\"),
                '"' => escaped.push_str("\\\""),
                '\n' => escaped.push_str("\\n"),
                '\r' => escaped.push_str("\\r"),
                '\t' => escaped.push_str("\\t"),
                c if c.is_control() => escaped.push_str(&format!("\\u{:04x}", c as u32)),
                c => escaped.push(c),
            }
        }
        escaped.push('"');
        escaped
    }

    fn list(&self, items: Vec<String>, scalars: bool) -> String {
        if scalars {
            format!("c({})", items.join(", "))
        } else {
            format!("list({})", items.join(", "))
        }
    }

    fn map(&self, entries: Vec<(String, String)>) -> String {
        let entries: Vec<String> = entries
            .into_iter()
            .map(|(k, v)| {
                if is_syntactic(&k) {
                    format!("{k} = {v}")
                } else {
                    format!("`{}` = {v}", k.replace('`', "\\`"))
                }
            })
            .collect();
        format!("list({})", entries.join(", "))
    }

    fn assemble(&self, calls: &[Call<'_>], options: &CodegenOptions) -> String {
        let mut lines = Vec::new();
        if options.header {
            lines.push(format!("library({})", options.r_library));
            lines.push("library(magrittr)".to_string());
            lines.push(String::new());
        }

        let indent = " ".repeat(options.indent);
        let last = calls.len().saturating_sub(1);
        for (i, call) in calls.iter().enumerate() {
            let arguments: Vec<String> = call
                .arguments
                .iter()
                .map(|(k, v)| format!("{k} = {v}"))
                .collect();
            let expression = format!("{}({})", call.operation, arguments.join(", "));
            let prefix = if i == 0 {
                format!("{} <- ", options.variable)
            } else {
                indent.clone()
            };
            let pipe = if i < last { " %>%" } else { "" };
            lines.push(format!("{prefix}{expression}{pipe}"));
        }

        let mut source = lines.join("\n");
        source.push('\n');
        source
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline() {
        let calls = vec![
            Call {
                operation: "create_basic_pk_model",
                arguments: vec![("administration", "\"iv\"".to_string())],
            },
            Call {
                operation: "set_michaelis_menten_elimination",
                arguments: vec![],
            },
            Call {
                operation: "remove_iiv",
                arguments: vec![("to_remove", "c(\"ETA_VC\")".to_string())],
            },
        ];
        let options = CodegenOptions {
            header: false,
            indent: 2,
            ..Default::default()
        };
        assert_eq!(
            R.assemble(&calls, &options),
            "model <- create_basic_pk_model(administration = \"iv\") %>%\n  \
             set_michaelis_menten_elimination() %>%\n  \
             remove_iiv(to_remove = c(\"ETA_VC\"))\n"
        );
    }

    #[test]
    fn test_single_call_has_no_pipe() {
        let calls = vec![Call {
            operation: "create_basic_pk_model",
            arguments: vec![("administration", "\"oral\"".to_string())],
        }];
        let source = R.assemble(&calls, &CodegenOptions::default());
        assert_eq!(
            source,
            "library(pharmr)\nlibrary(magrittr)\n\nmodel <- create_basic_pk_model(administration = \"oral\")\n"
        );
    }

    #[test]
    fn test_nested_lists_and_names() {
        assert_eq!(R.list(vec!["c(1)".into()], false), "list(c(1))");
        assert_eq!(
            R.map(vec![("a b".into(), "1".into())]),
            "list(`a b` = 1)"
        );
        assert_eq!(R.string("say \"hi\""), r#""say \"hi\"""#);
    }

    #[test]
    fn test_reserved_words_are_quoted() {
        assert_eq!(
            R.map(vec![("if".into(), "1".into()), ("NULL".into(), "2".into())]),
            "list(`if` = 1, `NULL` = 2)"
        );
        assert_eq!(R.map(vec![("WGT".into(), "1".into())]), "list(WGT = 1)");
    }

    #[test]
    fn test_control_characters_are_escaped() {
        assert_eq!(R.string("a\rb\tc\u{1}"), r#""a\rb\tc\u0001""#);
    }
}
