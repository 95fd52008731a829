// Copyright 2021 Datafuse Labs
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Cache key conventions, the entity dependency table and glob pattern matching.
//!
//! The formats are shared with other writers of the same cache store and must stay
//! bit-exact:
//!
//! ```text
//! {entity}-{id}-details
//! {entityPlural}-{serializedQueryJSON}
//! {entityA}-{entityB}-{idA}-{idB}
//! ```

use std::fmt;

const DETAIL_SUFFIX: &str = "-details";

/// The entity types whose records are cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Entity {
    User,
    Group,
    Course,
    Content,
    Quiz,
    Forum,
    Post,
    Tier,
}

/// Pairwise relations cached under `{a}-{b}-{idA}-{idB}`, each holding a join record that
/// embeds fields of both sides.
const RELATIONS: &[(Entity, Entity)] = &[
    (Entity::User, Entity::Group),
    (Entity::User, Entity::Course),
    (Entity::User, Entity::Forum),
    (Entity::User, Entity::Tier),
];

impl Entity {
    pub const ALL: [Entity; 8] = [
        Entity::User,
        Entity::Group,
        Entity::Course,
        Entity::Content,
        Entity::Quiz,
        Entity::Forum,
        Entity::Post,
        Entity::Tier,
    ];

    pub fn singular(&self) -> &'static str {
        match self {
            Entity::User => "user",
            Entity::Group => "group",
            Entity::Course => "course",
            Entity::Content => "content",
            Entity::Quiz => "quiz",
            Entity::Forum => "forum",
            Entity::Post => "post",
            Entity::Tier => "tier",
        }
    }

    pub fn plural(&self) -> &'static str {
        match self {
            Entity::User => "users",
            Entity::Group => "groups",
            Entity::Course => "courses",
            Entity::Content => "contents",
            Entity::Quiz => "quizzes",
            Entity::Forum => "forums",
            Entity::Post => "posts",
            Entity::Tier => "tiers",
        }
    }

    /// The per-record key, `{entity}-{id}-details`.
    pub fn detail_key(&self, id: &str) -> String {
        detail_key(self.singular(), id)
    }

    /// Patterns of every key family that may embed a copy of record `id`: its own keys and
    /// the pairwise relations it takes part in, on either side.
    ///
    /// Listings are not included: they hold ids only, see [`Entity::listing_pattern`].
    pub fn dependent_patterns(&self, id: &str) -> Vec<String> {
        let mut patterns = self.mergeable_patterns(id);
        patterns.extend(self.member_patterns(id));
        patterns
    }

    /// The dependent families whose top-level fields are this record's own: its keys and
    /// the relations where it is on the left. A field patch can be merged into these.
    pub fn mergeable_patterns(&self, id: &str) -> Vec<String> {
        let id = escape_pattern(id);
        let mut patterns = vec![format!("{}-{}-*", self.singular(), id)];

        for (a, b) in RELATIONS {
            if a == self {
                patterns.push(format!("{}-{}-{}-*", a.singular(), b.singular(), id));
            }
        }
        patterns
    }

    /// The relations where this record is on the right. Their top-level fields belong to
    /// the left side, so a patch of this record must evict them instead of merging.
    pub fn member_patterns(&self, id: &str) -> Vec<String> {
        let id = escape_pattern(id);
        RELATIONS
            .iter()
            .filter(|(_, b)| b == self)
            .map(|(a, b)| format!("{}-{}-*-{}", a.singular(), b.singular(), id))
            .collect()
    }

    /// Every cached listing of this entity, whatever the query.
    pub fn listing_pattern(&self) -> String {
        format!("{}-*", self.plural())
    }

    /// Every key of this entity: details, relations on either side, and listings.
    pub fn family_patterns(&self) -> Vec<String> {
        let mut patterns = vec![format!("{}*", self.singular())];
        for (a, b) in RELATIONS {
            if b == self {
                patterns.push(format!("{}-{}-*", a.singular(), b.singular()));
            }
        }
        patterns
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.singular())
    }
}

pub fn detail_key(entity: &str, id: &str) -> String {
    format!("{}-{}{}", entity, id, DETAIL_SUFFIX)
}

/// Recover the id from a detail key of `entity`. The id itself may contain `-`.
pub fn id_from_detail_key<'k>(entity: &str, key: &'k str) -> Option<&'k str> {
    key.strip_prefix(entity)?
        .strip_prefix('-')?
        .strip_suffix(DETAIL_SUFFIX)
}

/// The listing key, `{entityPlural}-{serializedQueryJSON}`.
pub fn collection_key(entity_plural: &str, serialized_query: &str) -> String {
    format!("{}-{}", entity_plural, serialized_query)
}

/// The pairwise relation key, `{entityA}-{entityB}-{idA}-{idB}`.
pub fn relation_key(a: Entity, b: Entity, id_a: &str, id_b: &str) -> String {
    format!("{}-{}-{}-{}", a.singular(), b.singular(), id_a, id_b)
}

/// Escape glob metacharacters so that `s` only matches itself.
pub fn escape_pattern(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Match `key` against a Redis-style glob: `*`, `?`, `[abc]`, `[^a-z]` and `\` escapes.
/// Matching is byte-wise.
pub fn matches_pattern(pattern: &str, key: &str) -> bool {
    glob(pattern.as_bytes(), key.as_bytes())
}

fn glob(p: &[u8], s: &[u8]) -> bool {
    match p.split_first() {
        None => s.is_empty(),
        Some((b'*', _)) => {
            let rest = skip_stars(p);
            if rest.is_empty() {
                return true;
            }
            (0..=s.len()).any(|i| glob(rest, &s[i..]))
        }
        Some((b'?', rest)) => !s.is_empty() && glob(rest, &s[1..]),
        Some((b'[', rest)) => {
            let Some((&c, s_rest)) = s.split_first() else {
                return false;
            };
            let (hit, consumed) = match_class(rest, c);
            hit && glob(&rest[consumed..], s_rest)
        }
        Some((b'\\', rest)) if !rest.is_empty() => {
            s.first() == Some(&rest[0]) && glob(&rest[1..], &s[1..])
        }
        Some((c, rest)) => s.first() == Some(c) && glob(rest, &s[1..]),
    }
}

fn skip_stars(p: &[u8]) -> &[u8] {
    let n = p.iter().take_while(|b| **b == b'*').count();
    &p[n..]
}

/// Match `c` against the class body following `[`. Returns whether it matched and how many
/// bytes of `class` were consumed, including the closing `]` if present.
fn match_class(class: &[u8], c: u8) -> (bool, usize) {
    let (negate, mut i) = if class.first() == Some(&b'^') {
        (true, 1)
    } else {
        (false, 0)
    };

    let mut hit = false;
    while i < class.len() && class[i] != b']' {
        if class[i] == b'\\' && i + 1 < class.len() {
            hit |= class[i + 1] == c;
            i += 2;
        } else if i + 2 < class.len() && class[i + 1] == b'-' && class[i + 2] != b']' {
            let (lo, hi) = if class[i] <= class[i + 2] {
                (class[i], class[i + 2])
            } else {
                (class[i + 2], class[i])
            };
            hit |= lo <= c && c <= hi;
            i += 3;
        } else {
            hit |= class[i] == c;
            i += 1;
        }
    }

    // An unterminated class runs to the end of the pattern.
    let consumed = if i < class.len() { i + 1 } else { i };
    (hit != negate, consumed)
}
