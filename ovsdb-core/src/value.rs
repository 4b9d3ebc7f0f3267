//! Typed OVSDB values and their JSON wire form.
//!
//! Wire encoding (RFC 7047 section 5.1):
//! - atoms are plain JSON scalars, except references which are
//!   `["uuid", id]` or `["named-uuid", id]`
//! - a set with exactly one element is the bare element, any other set is
//!   `["set", [...]]`
//! - a map is always `["map", [[k, v], ...]]`

use serde::{Serialize, Serializer};
use serde_json::{json, Value as Json};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// The all-zero UUID used as the default reference.
pub const ZERO_UUID: &str = "00000000-0000-0000-0000-000000000000";

const UUID_TAG: &str = "uuid";
const NAMED_UUID_TAG: &str = "named-uuid";
const SET_TAG: &str = "set";
const MAP_TAG: &str = "map";

/// Atomic column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AtomicType {
    Integer,
    Real,
    Boolean,
    String,
    Uuid,
}

impl AtomicType {
    /// Parses a schema type name.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "integer" => Some(AtomicType::Integer),
            "real" => Some(AtomicType::Real),
            "boolean" => Some(AtomicType::Boolean),
            "string" => Some(AtomicType::String),
            "uuid" => Some(AtomicType::Uuid),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AtomicType::Integer => "integer",
            AtomicType::Real => "real",
            AtomicType::Boolean => "boolean",
            AtomicType::String => "string",
            AtomicType::Uuid => "uuid",
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, AtomicType::Integer | AtomicType::Real)
    }

    /// Returns the zero value of the type.
    pub fn default_atom(&self) -> Atom {
        match self {
            AtomicType::Integer => Atom::Integer(0),
            AtomicType::Real => Atom::Real(0.0),
            AtomicType::Boolean => Atom::Boolean(false),
            AtomicType::String => Atom::String(String::new()),
            AtomicType::Uuid => Atom::Uuid(Reference::zero()),
        }
    }
}

impl fmt::Display for AtomicType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A reference to a row.
///
/// `Uuid` is a committed row id. `Named` is only meaningful inside the
/// transaction that declared it and is resolved by the server on commit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Reference {
    Uuid(String),
    Named(String),
}

impl Reference {
    pub fn uuid(id: impl Into<String>) -> Self {
        Reference::Uuid(id.into())
    }

    pub fn named(name: impl Into<String>) -> Self {
        Reference::Named(name.into())
    }

    /// Generates a fresh transaction-local name.
    ///
    /// Names start with `__` and only use characters valid in an OVSDB id.
    pub fn generate_named() -> Self {
        let id = uuid::Uuid::new_v4().to_string().replace('-', "_");
        Reference::Named(format!("__{}", id))
    }

    pub fn zero() -> Self {
        Reference::Uuid(ZERO_UUID.to_string())
    }

    pub fn id(&self) -> &str {
        match self {
            Reference::Uuid(id) | Reference::Named(id) => id,
        }
    }

    pub fn is_named(&self) -> bool {
        matches!(self, Reference::Named(_))
    }

    pub fn to_json(&self) -> Json {
        match self {
            Reference::Uuid(id) => json!([UUID_TAG, id]),
            Reference::Named(id) => json!([NAMED_UUID_TAG, id]),
        }
    }

    pub fn from_json(value: &Json) -> Result<Self, String> {
        match value.as_array().map(Vec::as_slice) {
            Some([Json::String(tag), Json::String(id)]) => match tag.as_str() {
                UUID_TAG => Ok(Reference::Uuid(id.clone())),
                NAMED_UUID_TAG => Ok(Reference::Named(id.clone())),
                other => Err(format!("unexpected reference tag '{}'", other)),
            },
            _ => Err(format!("expected [\"uuid\", id], got {}", value)),
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// A single scalar value.
///
/// Reals compare by total order so atoms can live in ordered collections.
#[derive(Debug, Clone)]
pub enum Atom {
    Integer(i64),
    Real(f64),
    Boolean(bool),
    String(String),
    Uuid(Reference),
}

impl Atom {
    pub fn atomic_type(&self) -> AtomicType {
        match self {
            Atom::Integer(_) => AtomicType::Integer,
            Atom::Real(_) => AtomicType::Real,
            Atom::Boolean(_) => AtomicType::Boolean,
            Atom::String(_) => AtomicType::String,
            Atom::Uuid(_) => AtomicType::Uuid,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Atom::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Returns the value of an integer or real atom as `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Atom::Integer(i) => Some(*i as f64),
            Atom::Real(r) => Some(*r),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Atom::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Atom::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_uuid(&self) -> Option<&Reference> {
        match self {
            Atom::Uuid(r) => Some(r),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Json {
        match self {
            Atom::Integer(i) => json!(i),
            Atom::Real(r) => json!(r),
            Atom::Boolean(b) => json!(b),
            Atom::String(s) => json!(s),
            Atom::Uuid(r) => r.to_json(),
        }
    }

    /// Decodes an atom of the given type. Reals also accept JSON integers.
    pub fn decode(ty: AtomicType, value: &Json) -> Result<Self, String> {
        let atom = match ty {
            AtomicType::Integer => value.as_i64().map(Atom::Integer),
            AtomicType::Real => value.as_f64().map(Atom::Real),
            AtomicType::Boolean => value.as_bool().map(Atom::Boolean),
            AtomicType::String => value.as_str().map(|s| Atom::String(s.to_string())),
            AtomicType::Uuid => return Reference::from_json(value).map(Atom::Uuid),
        };
        atom.ok_or_else(|| format!("expected {}, got {}", ty, value))
    }

    fn rank(&self) -> u8 {
        match self {
            Atom::Integer(_) => 0,
            Atom::Real(_) => 1,
            Atom::Boolean(_) => 2,
            Atom::String(_) => 3,
            Atom::Uuid(_) => 4,
        }
    }
}

impl PartialEq for Atom {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Atom {}

impl PartialOrd for Atom {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Atom {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Atom::Integer(a), Atom::Integer(b)) => a.cmp(b),
            (Atom::Real(a), Atom::Real(b)) => a.total_cmp(b),
            (Atom::Boolean(a), Atom::Boolean(b)) => a.cmp(b),
            (Atom::String(a), Atom::String(b)) => a.cmp(b),
            (Atom::Uuid(a), Atom::Uuid(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Atom::Integer(i) => write!(f, "{}", i),
            Atom::Real(r) => write!(f, "{}", r),
            Atom::Boolean(b) => write!(f, "{}", b),
            Atom::String(s) => write!(f, "{:?}", s),
            Atom::Uuid(r) => write!(f, "{}", r),
        }
    }
}

impl From<i64> for Atom {
    fn from(v: i64) -> Self {
        Atom::Integer(v)
    }
}

impl From<f64> for Atom {
    fn from(v: f64) -> Self {
        Atom::Real(v)
    }
}

impl From<bool> for Atom {
    fn from(v: bool) -> Self {
        Atom::Boolean(v)
    }
}

impl From<&str> for Atom {
    fn from(v: &str) -> Self {
        Atom::String(v.to_string())
    }
}

impl From<String> for Atom {
    fn from(v: String) -> Self {
        Atom::String(v)
    }
}

impl From<Reference> for Atom {
    fn from(v: Reference) -> Self {
        Atom::Uuid(v)
    }
}

/// An unordered collection of distinct atoms.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Set(BTreeSet<Atom>);

impl Set {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, atom: &Atom) -> bool {
        self.0.contains(atom)
    }

    pub fn insert(&mut self, atom: impl Into<Atom>) -> bool {
        self.0.insert(atom.into())
    }

    pub fn remove(&mut self, atom: &Atom) -> bool {
        self.0.remove(atom)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Atom> {
        self.0.iter()
    }

    /// Returns the smallest element, which is the only one for 0/1 sets.
    pub fn first(&self) -> Option<&Atom> {
        self.0.iter().next()
    }

    pub fn is_subset(&self, other: &Set) -> bool {
        self.0.is_subset(&other.0)
    }

    pub fn is_disjoint(&self, other: &Set) -> bool {
        self.0.is_disjoint(&other.0)
    }

    /// Applies a symmetric-difference delta: elements present in both are
    /// removed, the others are added.
    pub fn toggle(&mut self, delta: &Set) {
        for atom in delta.iter() {
            if !self.0.remove(atom) {
                self.0.insert(atom.clone());
            }
        }
    }

    pub fn to_json(&self) -> Json {
        if self.0.len() == 1 {
            if let Some(only) = self.first() {
                return only.to_json();
            }
        }
        let elements: Vec<Json> = self.0.iter().map(Atom::to_json).collect();
        json!([SET_TAG, elements])
    }

    /// Decodes a set, trying the bare single-element form first.
    pub fn decode(ty: AtomicType, value: &Json) -> Result<Self, String> {
        if let Ok(atom) = Atom::decode(ty, value) {
            return Ok(Set(BTreeSet::from([atom])));
        }

        let elements = match value.as_array().map(Vec::as_slice) {
            Some([Json::String(tag), Json::Array(elements)]) if tag == SET_TAG => elements,
            _ => return Err(format!("expected {} or [\"set\", [...]], got {}", ty, value)),
        };

        elements
            .iter()
            .map(|e| Atom::decode(ty, e))
            .collect::<Result<BTreeSet<_>, _>>()
            .map(Set)
    }
}

impl<A: Into<Atom>> FromIterator<A> for Set {
    fn from_iter<I: IntoIterator<Item = A>>(iter: I) -> Self {
        Set(iter.into_iter().map(Into::into).collect())
    }
}

impl fmt::Display for Set {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, atom) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", atom)?;
        }
        write!(f, "]")
    }
}

/// A mapping from atoms to atoms with unique keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Map(BTreeMap<Atom, Atom>);

impl Map {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, key: &Atom) -> Option<&Atom> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &Atom) -> bool {
        self.0.contains_key(key)
    }

    pub fn insert(&mut self, key: impl Into<Atom>, value: impl Into<Atom>) -> Option<Atom> {
        self.0.insert(key.into(), value.into())
    }

    pub fn remove(&mut self, key: &Atom) -> Option<Atom> {
        self.0.remove(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Atom, &Atom)> {
        self.0.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &Atom> {
        self.0.keys()
    }

    /// Returns true if every pair of `other` is present here with an equal value.
    pub fn includes(&self, other: &Map) -> bool {
        other.iter().all(|(k, v)| self.0.get(k) == Some(v))
    }

    /// Returns true if no pair of `other` is present here with an equal value.
    pub fn excludes(&self, other: &Map) -> bool {
        other.iter().all(|(k, v)| self.0.get(k) != Some(v))
    }

    /// Merges an update2 delta key by key.
    ///
    /// A pair equal to the current one removes the key, a different value
    /// overwrites it and a new key is inserted.
    pub fn merge_delta(&mut self, delta: &Map) {
        for (key, value) in delta.iter() {
            if self.0.get(key) == Some(value) {
                self.0.remove(key);
            } else {
                self.0.insert(key.clone(), value.clone());
            }
        }
    }

    pub fn to_json(&self) -> Json {
        let pairs: Vec<Json> = self
            .0
            .iter()
            .map(|(k, v)| json!([k.to_json(), v.to_json()]))
            .collect();
        json!([MAP_TAG, pairs])
    }

    /// Decodes `["map", [[k, v], ...]]`.
    pub fn decode(key_ty: AtomicType, value_ty: AtomicType, value: &Json) -> Result<Self, String> {
        let pairs = match value.as_array().map(Vec::as_slice) {
            Some([Json::String(tag), Json::Array(pairs)]) if tag == MAP_TAG => pairs,
            _ => return Err(format!("expected [\"map\", [...]], got {}", value)),
        };

        let mut map = BTreeMap::new();
        for pair in pairs {
            let (k, v) = match pair.as_array().map(Vec::as_slice) {
                Some([k, v]) => (k, v),
                _ => return Err(format!("map entry is not a [key, value] pair: {}", pair)),
            };
            let key = Atom::decode(key_ty, k)?;
            let val = Atom::decode(value_ty, v)?;
            if map.insert(key, val).is_some() {
                return Err(format!("duplicate map key {}", k));
            }
        }
        Ok(Map(map))
    }
}

impl<K: Into<Atom>, V: Into<Atom>> FromIterator<(K, V)> for Map {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Map(iter
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect())
    }
}

impl fmt::Display for Map {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (k, v)) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}={}", k, v)?;
        }
        write!(f, "}}")
    }
}

/// A column value: an atom, a set or a map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Atom(Atom),
    Set(Set),
    Map(Map),
}

impl Value {
    pub fn to_json(&self) -> Json {
        match self {
            Value::Atom(a) => a.to_json(),
            Value::Set(s) => s.to_json(),
            Value::Map(m) => m.to_json(),
        }
    }

    pub fn as_atom(&self) -> Option<&Atom> {
        match self {
            Value::Atom(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_set(&self) -> Option<&Set> {
        match self {
            Value::Set(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&Map> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Returns the single scalar carried by an atom or a one-element set.
    pub fn scalar(&self) -> Option<&Atom> {
        match self {
            Value::Atom(a) => Some(a),
            Value::Set(s) if s.len() == 1 => s.first(),
            _ => None,
        }
    }

    /// Short name of the variant, used in error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Atom(_) => "atom",
            Value::Set(_) => "set",
            Value::Map(_) => "map",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Atom(a) => write!(f, "{}", a),
            Value::Set(s) => write!(f, "{}", s),
            Value::Map(m) => write!(f, "{}", m),
        }
    }
}

impl From<Atom> for Value {
    fn from(v: Atom) -> Self {
        Value::Atom(v)
    }
}

impl From<Set> for Value {
    fn from(v: Set) -> Self {
        Value::Set(v)
    }
}

impl From<Map> for Value {
    fn from(v: Map) -> Self {
        Value::Map(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Atom(v.into())
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Atom(v.into())
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Atom(v.into())
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Atom(v.into())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Atom(v.into())
    }
}

impl From<Reference> for Value {
    fn from(v: Reference) -> Self {
        Value::Atom(v.into())
    }
}

macro_rules! serialize_via_json {
    ($($ty:ty),*) => {
        $(
            impl Serialize for $ty {
                fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                    self.to_json().serialize(serializer)
                }
            }
        )*
    };
}

serialize_via_json!(Reference, Atom, Set, Map, Value);

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_reference_encoding() {
        let r = Reference::uuid("8cc2eb5c-8e66-4554-af1d-8fa5b9321f99");
        assert_eq!(
            r.to_json(),
            json!(["uuid", "8cc2eb5c-8e66-4554-af1d-8fa5b9321f99"])
        );
        let n = Reference::named("row1");
        assert_eq!(n.to_json(), json!(["named-uuid", "row1"]));
        assert_eq!(Reference::from_json(&n.to_json()).unwrap(), n);
        assert!(Reference::from_json(&json!(["set", "x"])).is_err());
        assert!(Reference::from_json(&json!("x")).is_err());
    }

    #[test]
    fn test_generate_named() {
        let r = Reference::generate_named();
        assert!(r.is_named());
        assert!(r.id().starts_with("__"));
        assert!(r.id().chars().all(|c| c.is_ascii_alphanumeric() || c == '_'));
        assert_ne!(r, Reference::generate_named());
    }

    #[test]
    fn test_set_wire_forms() {
        assert_eq!(Set::new().to_json(), json!(["set", []]));

        let one: Set = [42i64].into_iter().collect();
        assert_eq!(one.to_json(), json!(42));

        let two: Set = ["a", "b"].into_iter().collect();
        assert_eq!(two.to_json(), json!(["set", ["a", "b"]]));
    }

    #[test]
    fn test_set_decode_bare_first() {
        let s = Set::decode(AtomicType::Uuid, &json!(["uuid", "u1"])).unwrap();
        assert_eq!(s.len(), 1);
        assert!(s.contains(&Atom::Uuid(Reference::uuid("u1"))));

        let s = Set::decode(
            AtomicType::Uuid,
            &json!(["set", [["uuid", "u1"], ["uuid", "u2"]]]),
        )
        .unwrap();
        assert_eq!(s.len(), 2);

        let s = Set::decode(AtomicType::String, &json!(["set", []])).unwrap();
        assert!(s.is_empty());

        assert!(Set::decode(AtomicType::Integer, &json!("x")).is_err());
        assert!(Set::decode(AtomicType::Integer, &json!(["map", []])).is_err());
        assert!(Set::decode(AtomicType::Integer, &json!(["set", ["x"]])).is_err());
    }

    #[test]
    fn test_real_accepts_integer_json() {
        assert_eq!(
            Atom::decode(AtomicType::Real, &json!(3)).unwrap(),
            Atom::Real(3.0)
        );
        assert!(Atom::decode(AtomicType::Integer, &json!(3.5)).is_err());
    }

    #[test]
    fn test_map_wire_forms() {
        assert_eq!(Map::new().to_json(), json!(["map", []]));

        let m: Map = [("k", "v")].into_iter().collect();
        assert_eq!(m.to_json(), json!(["map", [["k", "v"]]]));

        let decoded =
            Map::decode(AtomicType::String, AtomicType::String, &json!(["map", [["k", "v"]]]))
                .unwrap();
        assert_eq!(decoded, m);
    }

    #[test]
    fn test_map_decode_errors() {
        let (s, i) = (AtomicType::String, AtomicType::Integer);
        assert!(Map::decode(s, i, &json!(["set", []])).is_err());
        assert!(Map::decode(s, i, &json!(["map", [["k"]]])).is_err());
        assert!(Map::decode(s, i, &json!(["map", [["k", "v"]]])).is_err());
        assert!(Map::decode(s, i, &json!(["map", [["k", 1], ["k", 2]]])).is_err());
        assert!(Map::decode(s, i, &json!("k")).is_err());
    }

    #[test]
    fn test_set_toggle() {
        let mut current: Set = ["uuid-123", "uuid-456"].into_iter().collect();
        let delta: Set = ["uuid-456", "uuid-789"].into_iter().collect();
        current.toggle(&delta);
        let expected: Set = ["uuid-123", "uuid-789"].into_iter().collect();
        assert_eq!(current, expected);
    }

    #[test]
    fn test_set_toggle_empty_delta_is_no_change() {
        let mut current: Set = [1i64, 2].into_iter().collect();
        let before = current.clone();
        current.toggle(&Set::new());
        assert_eq!(current, before);
    }

    #[test]
    fn test_map_merge_delta() {
        let mut current: Map = [("foo", 1i64), ("bar", 2)].into_iter().collect();
        let delta: Map = [("foo", 1i64), ("bar", 4), ("qux", 5)].into_iter().collect();
        current.merge_delta(&delta);
        let expected: Map = [("bar", 4i64), ("qux", 5)].into_iter().collect();
        assert_eq!(current, expected);
    }

    #[test]
    fn test_map_includes_excludes() {
        let row: Map = [("a", 1i64), ("b", 2)].into_iter().collect();
        let subset: Map = [("a", 1i64)].into_iter().collect();
        assert!(row.includes(&subset));
        assert!(!row.excludes(&subset));

        let other: Map = [("a", 9i64), ("c", 3)].into_iter().collect();
        assert!(!row.includes(&other));
        assert!(row.excludes(&other));
    }

    #[test]
    fn test_atom_order_and_equality() {
        assert_eq!(Atom::Real(1.5), Atom::Real(1.5));
        assert_ne!(Atom::Integer(1), Atom::Real(1.0));
        assert!(Atom::Integer(1) < Atom::Integer(2));
        assert_eq!(Value::from("x").scalar(), Some(&Atom::from("x")));
    }

    fn int_sets() -> impl Strategy<Value = Set> {
        proptest::collection::vec(any::<i64>(), 0..8).prop_map(|v| v.into_iter().collect())
    }

    fn string_maps() -> impl Strategy<Value = Map> {
        proptest::collection::btree_map("[a-z]{1,6}", "[a-z0-9]{0,6}", 0..8)
            .prop_map(|m| m.into_iter().collect())
    }

    proptest! {
        #[test]
        fn prop_set_roundtrip(set in int_sets()) {
            let decoded = Set::decode(AtomicType::Integer, &set.to_json()).unwrap();
            prop_assert_eq!(decoded, set);
        }

        #[test]
        fn prop_string_set_roundtrip(v in proptest::collection::vec("[a-z]{0,5}", 0..6)) {
            let set: Set = v.into_iter().collect();
            let decoded = Set::decode(AtomicType::String, &set.to_json()).unwrap();
            prop_assert_eq!(decoded, set);
        }

        #[test]
        fn prop_map_roundtrip(map in string_maps()) {
            let decoded =
                Map::decode(AtomicType::String, AtomicType::String, &map.to_json()).unwrap();
            prop_assert_eq!(decoded, map);
        }

        #[test]
        fn prop_toggle_twice_restores(set in int_sets(), delta in int_sets()) {
            let mut s = set.clone();
            s.toggle(&delta);
            s.toggle(&delta);
            prop_assert_eq!(s, set);
        }
    }
}
