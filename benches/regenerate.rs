use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use pharmbuild::prelude::*;
use pharmbuild::CodegenOptions;
use std::hint::black_box;

fn dataset() -> Dataset {
    Dataset::from_reader(
        "ID,TIME,AMT,DV,WGT,SEX,OCC\n\
         1,0,100,.,70,0,1\n\
         1,2,0,3.1,70,0,1\n\
         1,24,100,.,70,0,2\n\
         1,26,0,2.7,70,0,2\n"
            .as_bytes(),
    )
    .unwrap()
    .with_path("pk.csv")
}

/// A state exercising every regeneration step
fn full_state(regenerator: &ModelRegenerator) -> ModelState {
    let mut state = regenerator.baseline_state(ModelType::Oral);
    state.attach_dataset(dataset());
    state
        .apply_mfl(
            "ABSORPTION(SEQ-ZO-FO);ELIMINATION(MM);TRANSITS(2);PERIPHERALS(2);LAGTIME(ON);\
             IIV(KM,EXP);IOV(CL,EXP);COVARIANCE(IIV,[CL,VC]);\
             COVARIATE(CL,WGT,pow);COVARIATE(VC,SEX,cat)",
        )
        .unwrap();
    state.set_error_models(1, &["comb"]).unwrap();
    state.set_initial_estimate("POP_VC", 12.0).unwrap();
    state
}

fn bench_regenerate(c: &mut Criterion) {
    let regenerator = ModelRegenerator::new();
    let mut group = c.benchmark_group("regenerate");

    let baseline = regenerator.baseline_state(ModelType::Oral);
    group.bench_function(BenchmarkId::from_parameter("baseline"), |b| {
        b.iter(|| black_box(regenerator.regenerate(black_box(&baseline))))
    });

    let full = full_state(&regenerator);
    group.bench_function(BenchmarkId::from_parameter("full"), |b| {
        b.iter(|| black_box(regenerator.regenerate(black_box(&full))))
    });

    group.finish();
}

fn bench_render(c: &mut Criterion) {
    let regenerator = ModelRegenerator::new();
    let log = regenerator
        .regenerate(&full_state(&regenerator))
        .unwrap()
        .log;
    let options = CodegenOptions::default();
    let mut group = c.benchmark_group("render");

    for language in Language::ALL {
        group.bench_with_input(BenchmarkId::from_parameter(language), &language, |b, l| {
            b.iter(|| black_box(CodeGenerator::new(&log, &options).generate(*l)))
        });
    }

    group.finish();
}

fn bench_parse_features(c: &mut Criterion) {
    let statements = "ABSORPTION(ZO);ELIMINATION(FO);PERIPHERALS(2);\
                      IIV([CL,VC,MAT],EXP);COVARIANCE(IIV,[CL,VC]);COVARIATE(CL,WGT,pow)";
    c.bench_function("parse_features", |b| {
        b.iter(|| black_box(parse_features(black_box(statements))))
    });
}

criterion_group!(benches, bench_regenerate, bench_render, bench_parse_features);
criterion_main!(benches);
