pub mod time;

/// Short random id used to tag a single execution attempt in logs.
pub fn shortid() -> String {
    nanoid::nanoid!(10)
}
