//! Incremental feature-to-model synthesis for pharmacometric model building
//!
//! A [ModelState] holds what the user chose (route, structural and PD
//! features, error models, random effects, covariates, parameter values).
//! A [ModelRegenerator] replays it from the baseline through a
//! [TransformationCatalog] into a [ConcreteModel] plus an [OperationLog],
//! and a [CodeGenerator] renders that log as a Python or R script.

pub mod catalog;
pub mod codegen;
pub mod config;
pub mod data;
pub mod error;
pub mod features;
pub mod log;
pub mod model;
pub mod regen;
pub mod session;
pub mod state;

pub use crate::catalog::{ErrorModelKind, Operation, PkCatalog, TransformationCatalog};
pub use crate::codegen::{CodeGenerator, CodegenOptions, GeneratedCode, Language};
pub use crate::config::BuilderConfig;
pub use crate::data::{ColumnType, DataInfo, Dataset};
pub use crate::error::{BuilderError, CodegenError};
pub use crate::features::{parse_features, Feature, FeatureCategory, FeatureSet};
pub use crate::log::{ArgValue, EntryTag, LogEntry, OperationLog};
pub use crate::model::{ConcreteModel, ModelType, Parameter, Parameters, TargetFormat};
pub use crate::regen::{ModelRegenerator, Regeneration};
pub use crate::session::{Session, SessionStore};
pub use crate::state::{ModelState, ParameterOverride};

pub mod prelude {
    pub mod features {
        pub use crate::features::{
            Absorption, CovariateEffect, EffectFunction, EffectOperation, Elimination, EtaForm,
            PdExpression, RandomEffectLevel, Turnover,
        };
    }
    pub mod model {
        pub use crate::model::{
            Allometry, EstimationMethod, EstimationStep, PdLink, PkStructure, RandomEffect,
        };
    }

    pub use crate::{
        parse_features, BuilderConfig, BuilderError, CodeGenerator, ConcreteModel, Dataset,
        Feature, FeatureSet, Language, ModelRegenerator, ModelState, ModelType, OperationLog,
        Session, SessionStore, TargetFormat, TransformationCatalog,
    };
}
