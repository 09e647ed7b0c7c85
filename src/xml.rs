//! Streaming consumption of response XML.
//!
//! Response documents are flat and well known, so instead of a document
//! tree the parser keeps a small fixed stack of recognized element tags
//! and hands each text event to the consumer selected for the operation.
//! The bounded depth doubles as a cheap malformed-input check.

use quick_xml::events::Event;
use quick_xml::Reader;
use tokio::io::AsyncBufRead;

use crate::error::{Error, Result};
use crate::response::{
    ResponseDetails, ResponseStatus, S3Bucket, S3MultipartUpload, S3Object,
};

/// Element names the consumers care about. Anything else parses as
/// `Unknown` and still occupies a stack slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ResponseNode {
    Bucket,
    Code,
    CommonPrefixes,
    Contents,
    CreationDate,
    ETag,
    Error,
    HostId,
    IsTruncated,
    Key,
    LastModified,
    Message,
    Name,
    NextMarker,
    Prefix,
    RequestId,
    Size,
    Upload,
    UploadId,
    Unknown,
}

impl ResponseNode {
    fn from_name(name: &[u8]) -> Self {
        match name {
            b"Bucket" => Self::Bucket,
            b"Code" => Self::Code,
            b"CommonPrefixes" => Self::CommonPrefixes,
            b"Contents" => Self::Contents,
            b"CreationDate" => Self::CreationDate,
            b"ETag" => Self::ETag,
            b"Error" => Self::Error,
            b"HostId" => Self::HostId,
            b"IsTruncated" => Self::IsTruncated,
            b"Key" => Self::Key,
            b"LastModified" => Self::LastModified,
            b"Message" => Self::Message,
            b"Name" => Self::Name,
            b"NextMarker" => Self::NextMarker,
            b"Prefix" => Self::Prefix,
            b"RequestId" => Self::RequestId,
            b"Size" => Self::Size,
            b"Upload" => Self::Upload,
            b"UploadId" => Self::UploadId,
            _ => Self::Unknown,
        }
    }
}

const MAX_DEPTH: usize = 8;

/// Stack of open elements, bounded to the depth any valid response needs.
#[derive(Debug)]
pub(crate) struct NodeStack {
    nodes: [ResponseNode; MAX_DEPTH],
    top: usize,
}

impl NodeStack {
    fn new() -> Self {
        Self {
            nodes: [ResponseNode::Unknown; MAX_DEPTH],
            top: 0,
        }
    }

    fn push(&mut self, node: ResponseNode) -> Result<()> {
        if self.top >= MAX_DEPTH {
            return Err(Error::Parser);
        }
        self.nodes[self.top] = node;
        self.top += 1;
        Ok(())
    }

    fn pop(&mut self) -> Result<()> {
        if self.top == 0 {
            return Err(Error::Parser);
        }
        self.top -= 1;
        Ok(())
    }

    pub(crate) fn depth(&self) -> usize {
        self.top
    }

    /// Innermost open element.
    pub(crate) fn current(&self) -> ResponseNode {
        if self.top == 0 {
            ResponseNode::Unknown
        } else {
            self.nodes[self.top - 1]
        }
    }

    /// Parent of the innermost open element.
    pub(crate) fn parent(&self) -> ResponseNode {
        if self.top < 2 {
            ResponseNode::Unknown
        } else {
            self.nodes[self.top - 2]
        }
    }

    fn root(&self) -> ResponseNode {
        if self.top == 0 {
            ResponseNode::Unknown
        } else {
            self.nodes[0]
        }
    }
}

/// Per-operation XML consumer. One execution path feeds all of them; the
/// variant picks which fields of which rows the text events land in.
#[derive(Debug)]
pub(crate) enum XmlDispatch {
    /// No structured payload expected; only the common error elements are
    /// consumed.
    None,
    ListBuckets(ListBucketsConsumer),
    ListObjects(ListObjectsConsumer),
    ListMultipartUploads(ListMultipartUploadsConsumer),
    /// Captures `UploadId` into the response details.
    InitiateMultipartUpload,
    /// Captures the composite `ETag` into the response details.
    CompleteMultipartUpload,
}

impl XmlDispatch {
    fn on_start(&mut self, stack: &NodeStack) {
        match self {
            Self::ListBuckets(c) => c.on_start(stack),
            Self::ListObjects(c) => c.on_start(stack),
            Self::ListMultipartUploads(c) => c.on_start(stack),
            _ => {}
        }
    }

    fn on_text(&mut self, stack: &NodeStack, text: &str, details: &mut ResponseDetails) {
        // Common error elements are handled the same way for every
        // operation: copy them out and, when the status was provisional,
        // promote it now that details exist.
        if stack.depth() == 2 && stack.root() == ResponseNode::Error {
            match stack.current() {
                ResponseNode::Code => details.error_code.assign(text),
                ResponseNode::Message => details.error_message.assign(text),
                ResponseNode::RequestId => details.request_id.assign(text),
                ResponseNode::HostId => details.host_id.assign(text),
                _ => {}
            }

            if details.status == ResponseStatus::HttpResourceNotFound
                || details.status == ResponseStatus::HttpOrAwsFailure
            {
                details.status = ResponseStatus::FailureWithDetails;
            }
        }

        match self {
            Self::None => {}
            Self::ListBuckets(c) => c.on_text(stack, text),
            Self::ListObjects(c) => c.on_text(stack, text, details),
            Self::ListMultipartUploads(c) => c.on_text(stack, text, details),
            Self::InitiateMultipartUpload => {
                if stack.depth() == 2 && stack.current() == ResponseNode::UploadId {
                    details.upload_id.assign(text);
                }
            }
            Self::CompleteMultipartUpload => {
                if stack.depth() == 2 && stack.current() == ResponseNode::ETag {
                    append_etag(&mut details.etag, text);
                }
            }
        }
    }

    fn on_end(&mut self, stack: &NodeStack) {
        match self {
            Self::ListBuckets(c) => c.on_end(stack),
            Self::ListObjects(c) => c.on_end(stack),
            Self::ListMultipartUploads(c) => c.on_end(stack),
            _ => {}
        }
    }
}

// Text for one element can arrive split; elements whose values must
// survive splitting append, single-token elements assign the last chunk.
trait Assign {
    fn assign(&mut self, text: &str);
}

impl Assign for String {
    fn assign(&mut self, text: &str) {
        self.clear();
        self.push_str(text);
    }
}

/// Append an ETag fragment, dropping the enclosing quotes the service
/// puts around the value.
fn append_etag(etag: &mut String, text: &str) {
    if text == "\"" {
        return;
    }
    etag.push_str(text.trim_matches('"'));
}

#[derive(Debug, Default)]
pub(crate) struct ListBucketsConsumer {
    current: S3Bucket,
    pub(crate) buckets: Vec<S3Bucket>,
}

impl ListBucketsConsumer {
    fn is_bucket_node(&self, stack: &NodeStack) -> bool {
        (stack.depth() == 3 || stack.depth() == 4)
            && stack.current() == ResponseNode::Bucket
    }

    fn on_start(&mut self, stack: &NodeStack) {
        if self.is_bucket_node(stack) {
            self.current = S3Bucket::default();
        }
    }

    fn on_text(&mut self, stack: &NodeStack, text: &str) {
        if stack.depth() < 3 {
            return;
        }

        match stack.current() {
            ResponseNode::Name => self.current.name.assign(text),
            ResponseNode::CreationDate => self.current.creation_date.assign(text),
            _ => {}
        }
    }

    fn on_end(&mut self, stack: &NodeStack) {
        if self.is_bucket_node(stack) {
            self.buckets.push(self.current.clone());
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct ListObjectsConsumer {
    current: S3Object,
    pub(crate) objects: Vec<S3Object>,
    is_walrus: bool,
    /// Walrus repeats the request prefix as a top-level `Prefix` element
    /// and strips it from common-prefix rows; it gets prepended back.
    outer_prefix: String,
    next_marker: String,
    last_key: String,
}

impl ListObjectsConsumer {
    pub(crate) fn new(is_walrus: bool) -> Self {
        Self {
            is_walrus,
            ..Self::default()
        }
    }

    /// Marker for the next page: the explicit `NextMarker` when present,
    /// the last key parsed otherwise.
    pub(crate) fn next_marker(&self) -> &str {
        if self.next_marker.is_empty() {
            &self.last_key
        } else {
            &self.next_marker
        }
    }

    fn is_object_node(&self, stack: &NodeStack) -> bool {
        if !self.is_walrus {
            stack.depth() == 2
                && (stack.current() == ResponseNode::Contents
                    || stack.current() == ResponseNode::CommonPrefixes)
        } else {
            (stack.depth() == 3 && stack.current() == ResponseNode::Contents)
                || (stack.depth() == 4
                    && stack.current() == ResponseNode::Prefix
                    && stack.parent() == ResponseNode::CommonPrefixes)
        }
    }

    fn on_start(&mut self, stack: &NodeStack) {
        if self.is_object_node(stack) {
            self.current = S3Object::default();
        }
    }

    fn on_text(&mut self, stack: &NodeStack, text: &str, details: &mut ResponseDetails) {
        if stack.depth() < 2 {
            return;
        }

        match stack.current() {
            ResponseNode::IsTruncated => details.is_truncated = text == "true",

            // Keys can be long enough to arrive in chunks.
            ResponseNode::Key => self.current.key.push_str(text),

            ResponseNode::LastModified => self.current.last_modified.assign(text),

            ResponseNode::ETag => append_etag(&mut self.current.etag, text),

            ResponseNode::Size => {
                self.current.size = text.trim().parse().unwrap_or_default();
            }

            ResponseNode::Prefix => {
                if stack.parent() == ResponseNode::CommonPrefixes {
                    if self.is_walrus {
                        self.current.key.push_str(&self.outer_prefix);
                    }
                    self.current.key.push_str(text);
                    self.current.is_dir = true;
                } else if self.is_walrus {
                    self.outer_prefix.assign(text);
                }
            }

            ResponseNode::NextMarker => self.next_marker.assign(text),

            _ => {}
        }
    }

    fn on_end(&mut self, stack: &NodeStack) {
        if self.is_object_node(stack) {
            self.last_key.assign(&self.current.key);
            self.objects.push(self.current.clone());
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct ListMultipartUploadsConsumer {
    current: S3MultipartUpload,
    pub(crate) uploads: Vec<S3MultipartUpload>,
    last_upload: S3MultipartUpload,
}

impl ListMultipartUploadsConsumer {
    /// Key/upload-id of the last row parsed; the pagination markers for
    /// the next page.
    pub(crate) fn last_upload(&self) -> &S3MultipartUpload {
        &self.last_upload
    }

    fn is_upload_node(&self, stack: &NodeStack) -> bool {
        stack.depth() == 2
            && (stack.current() == ResponseNode::Upload
                || stack.current() == ResponseNode::CommonPrefixes)
    }

    fn on_start(&mut self, stack: &NodeStack) {
        if self.is_upload_node(stack) {
            self.current = S3MultipartUpload::default();
        }
    }

    fn on_text(&mut self, stack: &NodeStack, text: &str, details: &mut ResponseDetails) {
        if stack.depth() < 2 {
            return;
        }

        match stack.current() {
            ResponseNode::IsTruncated => details.is_truncated = text == "true",

            ResponseNode::Key => self.current.key.push_str(text),

            ResponseNode::UploadId => self.current.upload_id.assign(text),

            ResponseNode::Prefix => {
                if stack.parent() == ResponseNode::CommonPrefixes {
                    self.current.key.push_str(text);
                    self.current.is_dir = true;
                }
            }

            _ => {}
        }
    }

    fn on_end(&mut self, stack: &NodeStack) {
        if self.is_upload_node(stack) {
            self.last_upload = self.current.clone();
            self.uploads.push(self.current.clone());
        }
    }
}

/// Drive the pull parser over a response body, feeding element events to
/// the dispatcher in document order.
///
/// # Errors
///
/// Will return `Err(Error::Parser)` on malformed XML, stack overflow or an
/// unmatched end tag
pub(crate) async fn consume<R>(
    reader: R,
    dispatch: &mut XmlDispatch,
    details: &mut ResponseDetails,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut reader = Reader::from_reader(reader);
    let mut stack = NodeStack::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into_async(&mut buf).await {
            Ok(Event::Start(e)) => {
                stack.push(ResponseNode::from_name(e.local_name().as_ref()))?;
                dispatch.on_start(&stack);
            }

            Ok(Event::Empty(e)) => {
                stack.push(ResponseNode::from_name(e.local_name().as_ref()))?;
                dispatch.on_start(&stack);
                dispatch.on_end(&stack);
                stack.pop()?;
            }

            Ok(Event::Text(t)) => {
                let text = t.unescape().map_err(|_| Error::Parser)?;
                dispatch.on_text(&stack, &text, details);
            }

            Ok(Event::CData(t)) => {
                let raw = t.into_inner();
                let text = std::str::from_utf8(&raw).map_err(|_| Error::Parser)?;
                dispatch.on_text(&stack, text, details);
            }

            Ok(Event::End(_)) => {
                dispatch.on_end(&stack);
                stack.pop()?;
            }

            Ok(Event::Eof) => {
                if stack.depth() != 0 {
                    return Err(Error::Parser);
                }
                return Ok(());
            }

            Ok(_) => {}

            Err(_) => return Err(Error::Parser),
        }

        buf.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn run(xml: &str, dispatch: &mut XmlDispatch) -> Result<ResponseDetails> {
        let mut details = ResponseDetails::new("http://host/bucket".to_string(), "");
        details.status = ResponseStatus::Success;
        consume(xml.as_bytes(), dispatch, &mut details).await?;
        Ok(details)
    }

    #[tokio::test]
    async fn test_list_buckets() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<ListAllMyBucketsResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
  <Owner><ID>abc</ID><DisplayName>me</DisplayName></Owner>
  <Buckets>
    <Bucket><Name>first</Name><CreationDate>2012-02-01T10:00:00.000Z</CreationDate></Bucket>
    <Bucket><Name>second</Name><CreationDate>2012-03-01T10:00:00.000Z</CreationDate></Bucket>
  </Buckets>
</ListAllMyBucketsResult>"#;

        let mut dispatch = XmlDispatch::ListBuckets(ListBucketsConsumer::default());
        run(xml, &mut dispatch).await.unwrap();

        let XmlDispatch::ListBuckets(c) = dispatch else {
            unreachable!()
        };
        assert_eq!(c.buckets.len(), 2);
        assert_eq!(c.buckets[0].name, "first");
        assert_eq!(c.buckets[0].creation_date, "2012-02-01T10:00:00.000Z");
        assert_eq!(c.buckets[1].name, "second");
    }

    #[tokio::test]
    async fn test_list_objects() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<ListBucketResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
  <Name>bucket</Name>
  <Prefix>tmp/</Prefix>
  <IsTruncated>true</IsTruncated>
  <Contents>
    <Key>tmp/folder1/test.dat</Key>
    <LastModified>2012-02-01T10:00:00.000Z</LastModified>
    <ETag>&quot;5eb63bbbe01eeed093cb22bb8f5acdc3&quot;</ETag>
    <Size>6</Size>
  </Contents>
  <CommonPrefixes><Prefix>tmp/folder2/</Prefix></CommonPrefixes>
</ListBucketResult>"#;

        let mut dispatch = XmlDispatch::ListObjects(ListObjectsConsumer::new(false));
        let details = run(xml, &mut dispatch).await.unwrap();
        assert!(details.is_truncated);

        let XmlDispatch::ListObjects(c) = dispatch else {
            unreachable!()
        };
        assert_eq!(c.objects.len(), 2);

        assert_eq!(c.objects[0].key, "tmp/folder1/test.dat");
        assert_eq!(c.objects[0].etag, "5eb63bbbe01eeed093cb22bb8f5acdc3");
        assert_eq!(c.objects[0].size, 6);
        assert!(!c.objects[0].is_dir);

        assert_eq!(c.objects[1].key, "tmp/folder2/");
        assert!(c.objects[1].is_dir);
        assert_eq!(c.objects[1].size, -1);

        // No explicit NextMarker: the last key parsed is the marker.
        assert_eq!(c.next_marker(), "tmp/folder2/");
    }

    #[tokio::test]
    async fn test_list_objects_explicit_next_marker() {
        let xml = r#"<ListBucketResult>
  <IsTruncated>true</IsTruncated>
  <NextMarker>tmp/zzz</NextMarker>
  <Contents><Key>tmp/aaa</Key><Size>1</Size></Contents>
</ListBucketResult>"#;

        let mut dispatch = XmlDispatch::ListObjects(ListObjectsConsumer::new(false));
        run(xml, &mut dispatch).await.unwrap();

        let XmlDispatch::ListObjects(c) = dispatch else {
            unreachable!()
        };
        assert_eq!(c.next_marker(), "tmp/zzz");
    }

    #[tokio::test]
    async fn test_list_objects_walrus() {
        // Walrus nests rows one level deeper and reports common prefixes
        // relative to the outer Prefix element.
        let xml = r#"<ListBucketResponse>
  <ListBucketResult>
    <Prefix>tmp/</Prefix>
    <IsTruncated>false</IsTruncated>
    <Contents>
      <Key>tmp/a.dat</Key>
      <ETag>5eb63bbbe01eeed093cb22bb8f5acdc3</ETag>
      <Size>11</Size>
    </Contents>
    <CommonPrefixes><Prefix>folder1/</Prefix></CommonPrefixes>
  </ListBucketResult>
</ListBucketResponse>"#;

        let mut dispatch = XmlDispatch::ListObjects(ListObjectsConsumer::new(true));
        run(xml, &mut dispatch).await.unwrap();

        let XmlDispatch::ListObjects(c) = dispatch else {
            unreachable!()
        };
        assert_eq!(c.objects.len(), 2);
        assert_eq!(c.objects[0].key, "tmp/a.dat");
        assert_eq!(c.objects[1].key, "tmp/folder1/");
        assert!(c.objects[1].is_dir);
    }

    #[tokio::test]
    async fn test_list_multipart_uploads() {
        let xml = r#"<ListMultipartUploadsResult>
  <Bucket>bucket</Bucket>
  <IsTruncated>false</IsTruncated>
  <Upload>
    <Key>big.dat</Key>
    <UploadId>VXBsb2FkIElE</UploadId>
  </Upload>
  <CommonPrefixes><Prefix>tmp/</Prefix></CommonPrefixes>
</ListMultipartUploadsResult>"#;

        let mut dispatch =
            XmlDispatch::ListMultipartUploads(ListMultipartUploadsConsumer::default());
        run(xml, &mut dispatch).await.unwrap();

        let XmlDispatch::ListMultipartUploads(c) = dispatch else {
            unreachable!()
        };
        assert_eq!(c.uploads.len(), 2);
        assert_eq!(c.uploads[0].key, "big.dat");
        assert_eq!(c.uploads[0].upload_id, "VXBsb2FkIElE");
        assert!(c.uploads[1].is_dir);
        assert_eq!(c.uploads[1].key, "tmp/");
        assert_eq!(c.last_upload().key, "tmp/");
    }

    #[tokio::test]
    async fn test_initiate_multipart_upload() {
        let xml = r#"<InitiateMultipartUploadResult>
  <Bucket>bucket</Bucket>
  <Key>big.dat</Key>
  <UploadId>VXBsb2FkIElE</UploadId>
</InitiateMultipartUploadResult>"#;

        let mut dispatch = XmlDispatch::InitiateMultipartUpload;
        let details = run(xml, &mut dispatch).await.unwrap();
        assert_eq!(details.upload_id, "VXBsb2FkIElE");
    }

    #[tokio::test]
    async fn test_complete_multipart_upload() {
        let xml = r#"<CompleteMultipartUploadResult>
  <Location>http://bucket.s3.amazonaws.com/big.dat</Location>
  <Bucket>bucket</Bucket>
  <Key>big.dat</Key>
  <ETag>&quot;3858f62230ac3c915f300c664312c11f-2&quot;</ETag>
</CompleteMultipartUploadResult>"#;

        let mut dispatch = XmlDispatch::CompleteMultipartUpload;
        let details = run(xml, &mut dispatch).await.unwrap();
        assert_eq!(details.etag, "3858f62230ac3c915f300c664312c11f-2");
    }

    #[tokio::test]
    async fn test_error_promotion() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<Error>
  <Code>NoSuchKey</Code>
  <Message>The specified key does not exist.</Message>
  <RequestId>4442587FB7D0A2F9</RequestId>
  <HostId>host-id</HostId>
</Error>"#;

        let mut details = ResponseDetails::new(String::new(), "");
        details.status = ResponseStatus::HttpResourceNotFound;
        let mut dispatch = XmlDispatch::None;
        consume(xml.as_bytes(), &mut dispatch, &mut details)
            .await
            .unwrap();

        assert_eq!(details.status, ResponseStatus::FailureWithDetails);
        assert_eq!(details.error_code, "NoSuchKey");
        assert_eq!(details.error_message, "The specified key does not exist.");
        assert_eq!(details.request_id, "4442587FB7D0A2F9");
        assert_eq!(details.host_id, "host-id");
    }

    #[tokio::test]
    async fn test_error_elements_without_promotion() {
        // A successful status must not be demoted by stray Error markup.
        let xml = "<Error><Code>Oops</Code></Error>";
        let mut details = ResponseDetails::new(String::new(), "");
        details.status = ResponseStatus::Success;
        let mut dispatch = XmlDispatch::None;
        consume(xml.as_bytes(), &mut dispatch, &mut details)
            .await
            .unwrap();
        assert_eq!(details.status, ResponseStatus::Success);
        assert_eq!(details.error_code, "Oops");
    }

    #[tokio::test]
    async fn test_stack_overflow_is_parser_error() {
        let xml = "<a><b><c><d><e><f><g><h><i>x</i></h></g></f></e></d></c></b></a>";
        let mut details = ResponseDetails::new(String::new(), "");
        let mut dispatch = XmlDispatch::None;
        let err = consume(xml.as_bytes(), &mut dispatch, &mut details)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Parser));
    }

    #[tokio::test]
    async fn test_truncated_document_is_parser_error() {
        let xml = "<ListBucketResult><Contents><Key>k</Key>";
        let mut details = ResponseDetails::new(String::new(), "");
        let mut dispatch = XmlDispatch::ListObjects(ListObjectsConsumer::new(false));
        let err = consume(xml.as_bytes(), &mut dispatch, &mut details)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Parser));
    }

    #[tokio::test]
    async fn test_empty_body_is_ok() {
        let mut details = ResponseDetails::new(String::new(), "");
        let mut dispatch = XmlDispatch::None;
        consume(&b""[..], &mut dispatch, &mut details).await.unwrap();
    }
}
