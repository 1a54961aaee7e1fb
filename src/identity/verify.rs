use super::types::ObjectId;
use crate::error::IdentityError;

/// The identity-bearing fields of an object.
pub trait IdentityFields {
    fn data_hash(&self) -> ObjectId;
    fn delete_token_id(&self) -> Option<ObjectId>;
    fn delete_token(&self) -> Option<ObjectId>;
    fn declared_object_id(&self) -> Option<ObjectId>;
    fn voucher(&self) -> Option<ObjectId>;
}

/// Pure content id: `hash(dataHash ++ deleteTokenId)`.
pub fn content_id(data_hash: &ObjectId, delete_token_id: Option<&ObjectId>) -> ObjectId {
    match delete_token_id {
        Some(token_id) => {
            ObjectId::hash_parts(&[data_hash.as_bytes().as_slice(), token_id.as_bytes().as_slice()])
        }
        None => ObjectId::hash_parts(&[data_hash.as_bytes().as_slice()]),
    }
}

/// Voucher binding an explicitly assigned id: `hash(deleteTokenId ++ objectId ++ dataHash)`.
pub fn voucher_for(
    delete_token_id: Option<&ObjectId>,
    object_id: &ObjectId,
    data_hash: &ObjectId,
) -> ObjectId {
    let token_id = delete_token_id.copied().unwrap_or(ObjectId::ZERO);
    ObjectId::hash_parts(&[
        token_id.as_bytes().as_slice(),
        object_id.as_bytes().as_slice(),
        data_hash.as_bytes().as_slice(),
    ])
}

pub fn delete_token_valid(exposed_token: &ObjectId, token_id: &ObjectId) -> bool {
    ObjectId::hash(exposed_token.as_bytes()) == *token_id
}

/// Derives the object id and verifies any attestation the object carries.
///
/// Objects with a voucher and a declared id must prove the binding, and a
/// tombstone must also expose a token that hashes to its delete-token-id.
/// All other objects get their pure content id.
pub fn compute_object_id<T: IdentityFields + ?Sized>(object: &T) -> Result<ObjectId, IdentityError> {
    let data_hash = object.data_hash();
    let token_id = object.delete_token_id();

    let (Some(voucher), Some(declared)) = (object.voucher(), object.declared_object_id()) else {
        return Ok(content_id(&data_hash, token_id.as_ref()));
    };

    if voucher_for(token_id.as_ref(), &declared, &data_hash) != voucher {
        return Err(IdentityError::InvalidObjectIdentity { declared });
    }

    if let Some(token) = object.delete_token() {
        let valid = token_id
            .as_ref()
            .is_some_and(|token_id| delete_token_valid(&token, token_id));
        if !valid {
            return Err(IdentityError::DeleteTokenMismatch {
                object_id: declared,
            });
        }
    }

    Ok(declared)
}
