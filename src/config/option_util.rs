use serde::Deserialize;

/// A config value given either as a single item or a list, possibly absent.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum NoneOrSome<T> {
    None,
    One(T),
    Some(Vec<T>),
}

impl<T> Default for NoneOrSome<T> {
    fn default() -> Self {
        NoneOrSome::None
    }
}

impl<T> NoneOrSome<T> {
    pub fn into_vec(self) -> Vec<T> {
        match self {
            NoneOrSome::None => vec![],
            NoneOrSome::One(item) => vec![item],
            NoneOrSome::Some(items) => items,
        }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        match self {
            NoneOrSome::None => [].iter(),
            NoneOrSome::One(item) => std::slice::from_ref(item).iter(),
            NoneOrSome::Some(items) => items.iter(),
        }
    }
}
