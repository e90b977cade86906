//! Standard allergen-detection prompt.

use crate::labels::LabelFilter;

/// Wrap an ingredient list in the task prompt every model is benchmarked with.
pub fn build_prompt(ingredients: &str, filter: &LabelFilter) -> String {
    let allowed = filter.labels().iter().collect::<Vec<_>>().join(", ");
    format!(
        "Task: Detect food allergens.\n\
         Ingredients:\n\
         {ingredients}\n\
         Allowed allergens:\n\
         {allowed}\n\
         Rules:\n\
         - Output ONLY a comma-separated list of allergens.\n\
         - If none are present, output {sentinel}.",
        ingredients = ingredients.trim(),
        sentinel = filter.sentinel(),
    )
}
