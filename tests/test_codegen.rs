//! Integration tests for code generation
//!
//! Logs come from real regenerations and are rendered in every language.

use pharmbuild::prelude::*;
use pharmbuild::{CodegenError, CodegenOptions, GeneratedCode};

fn dataset() -> Dataset {
    Dataset::from_reader("ID,TIME,AMT,DV,WGT,OCC\n1,0,100,.,70,1\n1,2,0,3.1,70,2\n".as_bytes())
        .unwrap()
        .with_path("data/pk.csv")
}

fn log_for(statements: &str) -> OperationLog {
    let regenerator = ModelRegenerator::new();
    let mut state = regenerator.baseline_state(ModelType::Oral);
    state.attach_dataset(dataset());
    state.apply_mfl(statements).unwrap();
    state.set_initial_estimate("POP_CL", 10.0).unwrap();
    state.set_bounds("POP_VC", 0.5, f64::INFINITY).unwrap();
    regenerator.regenerate(&state).unwrap().log
}

fn render(log: &OperationLog, language: Language) -> GeneratedCode {
    let options = CodegenOptions::default();
    CodeGenerator::new(log, &options).generate(language).unwrap()
}

/// Spell one call the same way in both languages
fn normalize(call: &str) -> String {
    call.chars()
        .filter(|c| !matches!(c, ' ' | '\'' | '"'))
        .collect::<String>()
        .replace("float(-inf)", "-Inf")
        .replace("float(inf)", "Inf")
        .replace("True", "TRUE")
        .replace("False", "FALSE")
        .replace("None", "NULL")
        .replace('{', "list(")
        .replace('}', ")")
        .replace(':', "=")
        .replace('[', "c(")
        .replace(']', ")")
        .replacen("(model,", "(", 1)
        .replacen("(model)", "()", 1)
}

/// Every call of `names`, in order, normalized
fn calls(source: &str, names: &[String]) -> Vec<String> {
    let mut out = Vec::new();
    let mut rest = source;
    for name in names {
        let start = rest
            .find(&format!("{name}("))
            .unwrap_or_else(|| panic!("{name} missing"));
        let call = &rest[start..];
        let end = call.find('\n').unwrap_or(call.len());
        out.push(normalize(call[..end].trim_end_matches(" %>%")));
        rest = &call[end..];
    }
    out
}

// ═══════════════════════════════════════════════════════════════════════════════
// Cross-language Tests
// ═══════════════════════════════════════════════════════════════════════════════

mod equivalence {
    use super::*;

    #[test]
    fn test_same_calls_in_every_language() {
        let log = log_for("ELIMINATION(MM);PERIPHERALS(1);IIV(KM,EXP);COVARIATE(CL,WGT,exp)");
        let python = render(&log, Language::Python);
        let r = render(&log, Language::R);

        assert_eq!(python.operations, r.operations);
        assert_eq!(python.operations.len(), log.len());
        assert_eq!(
            calls(&python.source, &python.operations),
            calls(&r.source, &r.operations)
        );
    }

    #[test]
    fn test_covariate_call_in_both_languages() {
        let log = log_for("COVARIATE(CL,WGT,exp)");
        let python = render(&log, Language::Python).source;
        let r = render(&log, Language::R).source;

        assert!(python.contains(
            "model = add_covariate_effect(model, parameter='CL', covariate='WGT', effect='exp', operation='*')"
        ));
        assert!(r.contains(
            "add_covariate_effect(parameter = \"CL\", covariate = \"WGT\", effect = \"exp\", operation = \"*\")"
        ));
    }

    #[test]
    fn test_overrides_are_rendered() {
        let log = log_for("PERIPHERALS(0)");
        let python = render(&log, Language::Python).source;
        let r = render(&log, Language::R).source;

        assert!(python.contains("set_initial_estimates(model, inits={'POP_CL': 10.0})"));
        assert!(python.contains("set_lower_bounds(model, bounds={'POP_VC': 0.5})"));
        assert!(r.contains("set_initial_estimates(inits = list(POP_CL = 10.0))"));
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Layout Tests
// ═══════════════════════════════════════════════════════════════════════════════

mod layout {
    use super::*;

    #[test]
    fn test_python_script() {
        let log = log_for("LAGTIME(ON)");
        let source = render(&log, Language::Python).source;
        let body: Vec<&str> = source
            .lines()
            .skip_while(|l| !l.starts_with("model = "))
            .collect();
        assert_eq!(
            body[0],
            "model = create_basic_pk_model(administration='oral')"
        );
        assert_eq!(
            body[1],
            "model = set_dataset(model, path_or_df='data/pk.csv', column_types={})"
        );
        assert_eq!(body[2], "model = add_lag_time(model)");
        assert!(source.starts_with("from pharmpy.modeling import (\n"));
    }

    #[test]
    fn test_r_pipeline() {
        let log = log_for("LAGTIME(ON)");
        let source = render(&log, Language::R).source;
        assert!(source.starts_with("library(pharmr)\n"));
        assert!(source.contains(
            "model <- create_basic_pk_model(administration = \"oral\") %>%\n    set_dataset("
        ));
        let last = source.lines().last().unwrap();
        assert!(!last.ends_with("%>%"));
    }

    #[test]
    fn test_custom_variable_without_header() {
        let log = log_for("LAGTIME(ON)");
        let options = CodegenOptions {
            variable: "m".to_string(),
            header: false,
            ..Default::default()
        };
        let source = CodeGenerator::new(&log, &options)
            .generate(Language::Python)
            .unwrap()
            .source;
        assert!(source.starts_with("m = create_basic_pk_model("));
        assert!(source.contains("m = add_lag_time(m)"));
    }

    #[test]
    fn test_control_characters_stay_inside_literals() {
        let regenerator = ModelRegenerator::new();
        let mut state = regenerator.baseline_state(ModelType::Iv);
        state.set_description("line1\rline2\tend");
        let log = regenerator.regenerate(&state).unwrap().log;

        let python = render(&log, Language::Python).source;
        assert!(!python.contains('\r'));
        assert!(python.contains(r"set_description(model, new_description='line1\rline2\tend')"));

        let r = render(&log, Language::R).source;
        assert!(!r.contains('\r'));
        assert!(r.contains(r#"set_description(new_description = "line1\rline2\tend")"#));
    }

    #[test]
    fn test_in_memory_dataset_cannot_be_rendered() {
        let regenerator = ModelRegenerator::new();
        let mut state = regenerator.baseline_state(ModelType::Iv);
        state.attach_dataset(Dataset::new(&["ID", "TIME", "DV"], vec![]).unwrap());
        let log = regenerator.regenerate(&state).unwrap().log;

        let options = CodegenOptions::default();
        for language in Language::ALL {
            let result = CodeGenerator::new(&log, &options).generate(language);
            match result {
                Err(CodegenError::UnsupportedArgument {
                    operation,
                    argument,
                    ..
                }) => {
                    assert_eq!(operation, "set_dataset");
                    assert_eq!(argument, "path_or_df");
                }
                other => panic!("expected an unsupported argument, got {other:?}"),
            }
        }
    }
}
