use super::{distinct_operations, Call, CodegenOptions, Dialect, Language};

/// Python: one reassignment of the model variable per operation
#[derive(Debug, Clone, Copy, Default)]
pub struct Python;

impl Dialect for Python {
    fn language(&self) -> Language {
        Language::Python
    }

    fn none(&self) -> String {
        "None".to_string()
    }

    fn boolean(&self, value: bool) -> String {
        let s = if value { "True" } else { "False" };
        s.to_string()
    }

    fn infinity(&self, negative: bool) -> String {
        if negative {
            "float('-inf')".to_string()
        } else {
            "float('inf')".to_string()
        }
    }

    fn string(&self, value: &str) -> String {
        let mut escaped = String::with_capacity(value.len() + 2);
        escaped.push('\'');
        for c in value.chars() {
            match c {
                '\\' => escaped.push_str("\\\\"),
                '\'' => escaped.push_str("\\'"),
                '\n' => escaped.push_str("\\n"),
                '\r' => escaped.push_str("\\r"),
                '\t' => escaped.push_str("\\t"),
                c if c.is_control() => escaped.push_str(&format!("\\x{:02x}", c as u32)),
                c => escaped.push(c),
            }
        }
        escaped.push('\'');
        escaped
    }

    fn list(&self, items: Vec<String>, _scalars: bool) -> String {
        format!("[{}]", items.join(", "))
    }

    fn map(&self, entries: Vec<(String, String)>) -> String {
        let entries: Vec<String> = entries
            .into_iter()
            .map(|(k, v)| format!("{}: {v}", self.string(&k)))
            .collect();
        format!("{{{}}}", entries.join(", "))
    }

    fn assemble(&self, calls: &[Call<'_>], options: &CodegenOptions) -> String {
        let mut lines = Vec::new();
        if options.header {
            lines.push(format!(
                "from {} import (\n{}\n)",
                options.python_module,
                distinct_operations(calls)
                    .iter()
                    .map(|name| format!("{}{name},", " ".repeat(options.indent)))
                    .collect::<Vec<_>>()
                    .join("\n")
            ));
            lines.push(String::new());
        }

        let model = options.variable.as_str();
        for (i, call) in calls.iter().enumerate() {
            let mut arguments: Vec<String> = Vec::new();
            if i > 0 {
                arguments.push(model.to_string());
            }
            arguments.extend(call.arguments.iter().map(|(k, v)| format!("{k}={v}")));
            lines.push(format!("{model} = {}({})", call.operation, arguments.join(", ")));
        }

        let mut source = lines.join("\n");
        source.push('\n');
        source
    }
}
