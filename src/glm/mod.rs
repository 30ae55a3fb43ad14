//! Design formulas and negative binomial GLM pieces

mod design;
mod negative_binomial;

pub use design::{check_full_rank, Design, ModelMatrix, Term};
pub use negative_binomial::{fit_nb_glm_mu, linear_model_mu, nb_log_likelihood, nb_weight, MAX_BETA, MIN_MU};
pub(crate) use negative_binomial::{to_dmatrix, weighted_gram};
