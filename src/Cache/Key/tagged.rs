// Composite keys built from tagged fields.
//
// A tag is a zero-sized marker type naming one semantic field ("campaign id")
// and fixing its value type. A key type is an ordered set of tagged fields
// generated by `tagged_key!`. Because every key knows which tags it carries
// (`HasTag`), any key whose tags are a subset of another's can be projected
// out of it (`ProjectFrom`). The index code is generic over "a key type" and
// never sees record or schema types.

use crate::Structs::Flat;
use std::fmt::Debug;
use std::hash::Hash;

/// A field selector: names one semantic role and the type of its value.
pub trait Tag: 'static {
    /// Value type of the field.
    type Value: Flat + Eq + Ord + Hash + Debug;

    /// Name recorded in schema fingerprints and diagnostics.
    const NAME: &'static str;
}

/// A composite key: a flat tuple of tagged fields, compared field by field
/// in declaration order.
pub trait TaggedKey: Flat + Eq + Ord + Hash + Debug {
    /// Tag names in field order.
    const TAGS: &'static [&'static str];

    /// Value of the field selected by `G`.
    #[inline]
    fn field<G: Tag>(&self) -> &G::Value
    where
        Self: HasTag<G>,
    {
        <Self as HasTag<G>>::get(self)
    }
}

/// Implemented by every key that carries a field tagged `G`.
pub trait HasTag<G: Tag> {
    fn get(&self) -> &G::Value;
}

/// A key that can be built from the fields of a larger key `F`.
///
/// Every key projects from itself, and from any key whose tags are a
/// superset of its own.
pub trait ProjectFrom<F>: TaggedKey {
    fn project_from(source: &F) -> Self;
}

/// Declare tags: `define_tag!(pub CampaignIdTag: u32);`
#[macro_export]
macro_rules! define_tag {
    ($($(#[$meta:meta])* $vis:vis $name:ident : $value:ty);+ $(;)?) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
            $vis struct $name;

            impl $crate::Cache::Key::Tag for $name {
                type Value = $value;
                const NAME: &'static str = stringify!($name);
            }
        )+
    };
}

/// Declare a key type over previously defined tags.
///
/// ```
/// use rtb_datacache::{define_tag, tagged_key};
///
/// define_tag! {
///     pub CampaignIdTag: u32;
///     pub CreativeIdTag: u32;
/// }
///
/// tagged_key! {
///     pub struct PlacementKey {
///         campaign_id: CampaignIdTag,
///         creative_id: CreativeIdTag,
///     }
/// }
///
/// tagged_key! {
///     pub struct CreativeKey {
///         creative_id: CreativeIdTag,
///     }
/// }
///
/// use rtb_datacache::Cache::Key::{ProjectFrom, TaggedKey};
/// let key = PlacementKey { campaign_id: 7, creative_id: 11 };
/// assert_eq!(CreativeKey::project_from(&key), CreativeKey { creative_id: 11 });
/// assert_eq!(*key.field::<CampaignIdTag>(), 7);
/// ```
#[macro_export]
macro_rules! tagged_key {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $($field:ident : $tag:ty),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[repr(C)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        $vis struct $name {
            $(pub $field: <$tag as $crate::Cache::Key::Tag>::Value,)+
        }

        unsafe impl $crate::Structs::Flat for $name {}

        impl $crate::Cache::Key::TaggedKey for $name {
            const TAGS: &'static [&'static str] =
                &[$(<$tag as $crate::Cache::Key::Tag>::NAME),+];
        }

        $(
            impl $crate::Cache::Key::HasTag<$tag> for $name {
                #[inline]
                fn get(&self) -> &<$tag as $crate::Cache::Key::Tag>::Value {
                    &self.$field
                }
            }
        )+

        impl<F> $crate::Cache::Key::ProjectFrom<F> for $name
        where
            F: $($crate::Cache::Key::HasTag<$tag> +)+ ,
        {
            #[inline]
            fn project_from(source: &F) -> Self {
                Self {
                    $($field: *<F as $crate::Cache::Key::HasTag<$tag>>::get(source),)+
                }
            }
        }
    };
}
