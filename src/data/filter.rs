use bson::spec::BinarySubtype;
use bson::{doc, Binary, Bson, Document};
use uuid::Uuid;

/// Binary subtype 4 representation, matching `uuid_1_as_binary` fields.
#[inline]
pub fn uuid(id: Uuid) -> Bson {
    Bson::Binary(Binary {
        subtype: BinarySubtype::Uuid,
        bytes: id.as_bytes().to_vec(),
    })
}

#[inline]
pub fn by_id(id: Uuid) -> Document {
    doc! { "_id": uuid(id) }
}

#[inline]
pub fn by_key(key: impl AsRef<str>) -> Document {
    doc! { "_id": key.as_ref() }
}

#[inline]
pub fn by_email(email: impl AsRef<str>) -> Document {
    doc! { "email": email.as_ref().to_lowercase() }
}

#[inline]
pub fn by_uuid_field(field: &str, id: Uuid) -> Document {
    let mut filter = Document::new();
    filter.insert(field, uuid(id));
    filter
}
