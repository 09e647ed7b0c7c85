//! Per-operation request constructors.
//! <https://docs.aws.amazon.com/AmazonS3/latest/API/API_Operations.html>
//!
//! Each module composes the URL, query string and signed headers for one
//! operation and plugs the right body source/sink and XML consumer into
//! the shared execution path.

// <https://docs.aws.amazon.com/AmazonS3/latest/API/API_GetObject.html>
mod getobject;
pub(crate) use self::getobject::GetObject;

// <https://docs.aws.amazon.com/AmazonS3/latest/API/API_PutObject.html>
// <https://docs.aws.amazon.com/AmazonS3/latest/API/API_UploadPart.html>
mod putobject;
pub(crate) use self::putobject::PutObject;

// <https://docs.aws.amazon.com/AmazonS3/latest/API/API_DeleteObject.html>
mod deleteobject;
pub(crate) use self::deleteobject::DeleteObject;

// <https://docs.aws.amazon.com/AmazonS3/latest/API/API_CreateBucket.html>
mod createbucket;
pub(crate) use self::createbucket::CreateBucket;

// <https://docs.aws.amazon.com/AmazonS3/latest/API/API_ListBuckets.html>
mod listbuckets;
pub(crate) use self::listbuckets::ListBuckets;

// <https://docs.aws.amazon.com/AmazonS3/latest/API/API_ListObjects.html>
mod listobjects;
pub(crate) use self::listobjects::ListObjects;

// <https://docs.aws.amazon.com/AmazonS3/latest/API/API_CreateMultipartUpload.html>
mod initiatemultipartupload;
pub(crate) use self::initiatemultipartupload::InitiateMultipartUpload;

// <https://docs.aws.amazon.com/AmazonS3/latest/API/API_CompleteMultipartUpload.html>
mod completemultipartupload;
pub(crate) use self::completemultipartupload::CompleteMultipartUpload;

// <https://docs.aws.amazon.com/AmazonS3/latest/API/API_ListMultipartUploads.html>
mod listmultipartuploads;
pub(crate) use self::listmultipartuploads::ListMultipartUploads;

/// Options shared by `put`, `put_part` and `initiate_multipart_upload`.
#[derive(Clone, Debug, Default)]
pub struct PutOptions {
    /// Send `x-amz-acl: public-read`.
    pub make_public: bool,
    /// Send `x-amz-server-side-encryption: AES256`.
    pub server_encrypt: bool,
    /// Content type of the object; `application/octet-stream` when unset.
    pub content_type: Option<String>,
}
