//! Dietary safety filtering of the recipe catalogue.

use crate::recipes::Recipe;

const MEAT_AND_FISH: &[&str] = &[
    "beef", "pork", "chicken", "lamb", "veal", "ham", "bacon", "sausage", "turkey", "duck",
    "fish", "salmon", "tuna", "cod", "shrimp", "prawn", "anchovy", "boeuf", "bœuf", "porc",
    "poulet", "agneau", "veau", "jambon", "lardon", "saucisse", "dinde", "canard", "poisson",
    "saumon", "thon", "cabillaud", "crevette", "anchois",
];
const DAIRY: &[&str] = &[
    "milk", "cheese", "butter", "cream", "yogurt", "yoghurt", "lait", "fromage", "beurre",
    "crème", "creme", "yaourt", "mozzarella", "parmesan", "emmental",
];
const ANIMAL_EXTRA: &[&str] = &["egg", "honey", "gelatin", "oeuf", "œuf", "miel", "gélatine"];
const GLUTEN: &[&str] = &[
    "wheat", "flour", "bread", "pasta", "barley", "rye", "couscous", "semolina", "blé", "farine",
    "pain", "pâtes", "pates", "orge", "seigle", "semoule", "spaghetti", "tagliatelle",
];
const PORK: &[&str] = &["pork", "ham", "bacon", "sausage", "porc", "jambon", "lardon", "saucisse", "chorizo"];
const NUTS: &[&str] = &[
    "peanut", "almond", "walnut", "hazelnut", "cashew", "pistachio", "cacahuète", "cacahuete",
    "amande", "noix", "noisette", "pistache",
];
const SEAFOOD: &[&str] = &[
    "fish", "salmon", "tuna", "cod", "shrimp", "prawn", "mussel", "poisson", "saumon", "thon",
    "cabillaud", "crevette", "moule",
];

/// Ingredient words a restriction forbids. Unknown restrictions are treated
/// as a single allergen word (`"no_celery"` forbids `celery`).
pub fn forbidden_keywords(restriction: &str) -> Vec<String> {
    let lists: &[&[&str]] = match restriction {
        "vegetarian" | "vegetarien" | "végétarien" => &[MEAT_AND_FISH],
        "vegan" | "végan" | "vegetalien" | "végétalien" => &[MEAT_AND_FISH, DAIRY, ANIMAL_EXTRA],
        "gluten_free" | "sans_gluten" => &[GLUTEN],
        "lactose_free" | "dairy_free" | "sans_lactose" => &[DAIRY],
        "pork_free" | "no_pork" | "halal" | "sans_porc" => &[PORK],
        "nut_free" | "sans_noix" | "sans_fruits_a_coque" => &[NUTS],
        "fish_free" | "seafood_free" | "pescatarian_free" => &[SEAFOOD],
        other => {
            let word = other
                .strip_prefix("no_")
                .or_else(|| other.strip_prefix("sans_"))
                .unwrap_or(other);
            return vec![word.replace('_', " ")];
        }
    };
    lists.iter().flat_map(|l| l.iter().map(|s| s.to_string())).collect()
}

fn words(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

/// Word-level match so that "egg" does not hit "eggplant"; plural `s`/`x` allowed.
fn mentions(text: &str, keyword: &str) -> bool {
    let kw = words(keyword);
    if kw.is_empty() {
        return false;
    }
    let tokens = words(text);
    tokens.windows(kw.len()).any(|window| {
        window.iter().zip(&kw).all(|(t, k)| {
            t == k || t.strip_suffix('s') == Some(k.as_str()) || t.strip_suffix('x') == Some(k.as_str())
        })
    })
}

pub fn is_recipe_safe(recipe: &Recipe, restrictions: &[String]) -> bool {
    restrictions.iter().all(|r| {
        forbidden_keywords(r).iter().all(|kw| {
            !mentions(&recipe.title, kw) && !recipe.ingredients.iter().any(|line| mentions(line, kw))
        })
    })
}

pub fn safe_candidates(recipes: Vec<Recipe>, restrictions: &[String]) -> Vec<Recipe> {
    recipes
        .into_iter()
        .filter(|r| is_recipe_safe(r, restrictions))
        .collect()
}
