//! `Upvote` and `Recommendation`.

use sw_core::{
    ActionSchema, BehaviorError, BehaviorResult, ConceptBehavior, ConceptState, Value, ValueMap,
    default_effect, default_query,
};

use crate::library::{position, row, text};

/// Items are rows of `{itemId, author, count}`; each vote is a row of
/// `{itemId, userId}`. A user votes on an item at most once. The scalar
/// `count` field totals the votes across all items.
#[derive(Clone, Copy, Debug, Default)]
pub struct Upvote;

fn is_vote(r: &ValueMap) -> bool {
    r.contains_key("userId")
}

fn item_index(state: &ConceptState, item: &str) -> Option<usize> {
    state
        .rows
        .iter()
        .position(|r| !is_vote(r) && r.get("itemId").and_then(Value::as_str) == Some(item))
}

impl ConceptBehavior for Upvote {
    fn apply_effect(
        &mut self,
        action: &ActionSchema,
        state: &mut ConceptState,
        inputs: &ValueMap,
    ) -> BehaviorResult<ValueMap> {
        match action.name.as_str() {
            "post" => {
                let item = text(inputs, "itemId")?;
                let author = text(inputs, "author")?;
                if item_index(state, item).is_some() {
                    return Err(BehaviorError(format!("item already posted: {item}")));
                }
                state.rows.push(row(&[
                    ("itemId", Value::str(item)),
                    ("author", Value::str(author)),
                    ("count", Value::Number(0.0)),
                ]));
                Ok(row(&[("itemId", Value::str(item))]))
            }
            "upvote" => {
                let item = text(inputs, "itemId")?;
                let user = text(inputs, "userId")?;
                let i = item_index(state, item)
                    .ok_or_else(|| BehaviorError(format!("unknown item: {item}")))?;
                let voted = state.rows.iter().any(|r| {
                    is_vote(r)
                        && r.get("itemId").and_then(Value::as_str) == Some(item)
                        && r.get("userId").and_then(Value::as_str) == Some(user)
                });
                if voted {
                    return Err(BehaviorError(format!("{user} already upvoted {item}")));
                }

                let votes = state.rows[i].get("count").and_then(Value::as_f64).unwrap_or(0.0);
                state.rows[i].insert("count".into(), Value::Number(votes + 1.0));
                let author = state.rows[i].get("author").cloned().unwrap_or(Value::Null);
                state
                    .rows
                    .push(row(&[("itemId", Value::str(item)), ("userId", Value::str(user))]));
                let total = state.field("count").as_f64().unwrap_or(0.0);
                state.set("count", Value::Number(total + 1.0));

                Ok(row(&[("itemId", Value::str(item)), ("author", author)]))
            }
            _ => Ok(default_effect(action, state, inputs)),
        }
    }

    /// Queries range over item rows only, never the vote total.
    fn run_query(
        &self,
        action: &ActionSchema,
        state: &ConceptState,
        inputs: &ValueMap,
    ) -> BehaviorResult<Vec<ValueMap>> {
        let items = ConceptState {
            fields: ValueMap::new(),
            rows: state.rows.iter().filter(|r| !is_vote(r)).cloned().collect(),
        };
        Ok(default_query(action, &items, inputs))
    }
}

/// Ranking rows of `{itemId, score}`; `updateRanks` replaces an item's
/// score. Queries return rows by descending score.
#[derive(Clone, Copy, Debug, Default)]
pub struct Recommendation;

fn score(r: &ValueMap) -> f64 {
    r.get("score").and_then(Value::as_f64).unwrap_or(0.0)
}

impl ConceptBehavior for Recommendation {
    fn apply_effect(
        &mut self,
        action: &ActionSchema,
        state: &mut ConceptState,
        inputs: &ValueMap,
    ) -> BehaviorResult<ValueMap> {
        if action.name != "updateRanks" {
            return Ok(default_effect(action, state, inputs));
        }
        let item = text(inputs, "itemId")?;
        let score = inputs
            .get("score")
            .and_then(Value::as_f64)
            .ok_or_else(|| BehaviorError("'score' must be a number".into()))?;
        let entry = row(&[("itemId", Value::str(item)), ("score", Value::Number(score))]);
        match position(state, "itemId", item) {
            Some(i) => state.rows[i] = entry,
            None => state.rows.push(entry),
        }
        Ok(ValueMap::new())
    }

    fn run_query(
        &self,
        action: &ActionSchema,
        state: &ConceptState,
        inputs: &ValueMap,
    ) -> BehaviorResult<Vec<ValueMap>> {
        let mut ranked = state.clone();
        ranked.rows.sort_by(|a, b| score(b).total_cmp(&score(a)));
        Ok(default_query(action, &ranked, inputs))
    }
}
