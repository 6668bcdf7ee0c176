use crate::Object;
use serde::{
    de::{Error, MapAccess, Visitor},
    Deserialize, Deserializer, Serialize, Serializer,
};
use std::fmt::{self, Formatter};
use std::marker::PhantomData;

// Upper bound on capacity reserved from an untrusted size hint.
const MAX_PREALLOC: usize = 4096;

struct ObjectVisitor<V> {
    value_marker: PhantomData<V>,
}

impl<V> Serialize for Object<V>
where
    V: Serialize,
{
    fn serialize<Sr>(&self, serializer: Sr) -> Result<Sr::Ok, Sr::Error>
    where
        Sr: Serializer,
    {
        serializer.collect_map(self.iter())
    }
}

impl<'de, V> Deserialize<'de> for Object<V>
where
    V: Deserialize<'de>,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_map(ObjectVisitor::new())
    }
}

impl<V> ObjectVisitor<V> {
    pub(crate) fn new() -> Self {
        Self {
            value_marker: PhantomData,
        }
    }
}

impl<'de, V> Visitor<'de> for ObjectVisitor<V>
where
    V: Deserialize<'de>,
{
    type Value = Object<V>;

    fn expecting(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "a map with string keys")
    }

    /// Duplicate keys in the input keep their first value.
    fn visit_map<M>(self, mut access: M) -> Result<Self::Value, M::Error>
    where
        M: MapAccess<'de>,
    {
        let mut object = Object::new();
        if let Some(n) = access.size_hint() {
            object.reserve(n.min(MAX_PREALLOC)).map_err(M::Error::custom)?;
        }
        while let Some((key, value)) = access.next_entry::<String, V>()? {
            object.insert((key, value)).map_err(M::Error::custom)?;
        }
        Ok(object)
    }
}
