use std::collections::HashMap;

/// Well-known tag kinds a caller may attach to a stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TagType {
    Artist,
    ArtistSort,
    Album,
    AlbumArtist,
    Title,
    Track,
    Name,
    Genre,
    Date,
    Composer,
    Performer,
    Comment,
    Disc,
}

impl TagType {
    const ALL: [TagType; 13] = [
        TagType::Artist,
        TagType::ArtistSort,
        TagType::Album,
        TagType::AlbumArtist,
        TagType::Title,
        TagType::Track,
        TagType::Name,
        TagType::Genre,
        TagType::Date,
        TagType::Composer,
        TagType::Performer,
        TagType::Comment,
        TagType::Disc,
    ];

    fn default_name(&self) -> &'static str {
        match self {
            TagType::Artist => "Artist",
            TagType::ArtistSort => "ArtistSort",
            TagType::Album => "Album",
            TagType::AlbumArtist => "AlbumArtist",
            TagType::Title => "Title",
            TagType::Track => "Track",
            TagType::Name => "Name",
            TagType::Genre => "Genre",
            TagType::Date => "Date",
            TagType::Composer => "Composer",
            TagType::Performer => "Performer",
            TagType::Comment => "Comment",
            TagType::Disc => "Disc",
        }
    }
}

/// Maps tag kinds to the names written into the comment header.
#[derive(Clone, Debug)]
pub struct TagNames {
    names: HashMap<TagType, String>,
}

impl TagNames {
    /// Override the name used for `kind`.
    pub fn with_name(mut self, kind: TagType, name: impl Into<String>) -> Self {
        self.names.insert(kind, name.into());
        self
    }

    pub fn name(&self, kind: TagType) -> &str {
        self.names
            .get(&kind)
            .map(String::as_str)
            .unwrap_or_else(|| kind.default_name())
    }
}

impl Default for TagNames {
    fn default() -> Self {
        Self {
            names: TagType::ALL
                .iter()
                .map(|kind| (*kind, kind.default_name().to_string()))
                .collect(),
        }
    }
}

/// Ordered `(name, value)` metadata for one logical bitstream.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Tag {
    items: Vec<(String, String)>,
}

impl Tag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.items.push((name.into(), value.into()));
    }

    /// Add a typed item, resolving its name through `names`.
    pub fn push_typed(&mut self, names: &TagNames, kind: TagType, value: impl Into<String>) {
        self.push(names.name(kind), value);
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.push(name, value);
        self
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.items.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Comment entries with names upper-cased, ready for the header.
    ///
    /// Fails with the offending name if any name or value holds a NUL byte.
    pub(crate) fn comments(&self) -> Result<Vec<(String, String)>, String> {
        self.items
            .iter()
            .map(|(name, value)| {
                if name.contains('\0') || value.contains('\0') {
                    Err(name.clone())
                } else {
                    Ok((name.to_ascii_uppercase(), value.clone()))
                }
            })
            .collect()
    }
}

impl<K, V> FromIterator<(K, V)> for Tag
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            items: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}
