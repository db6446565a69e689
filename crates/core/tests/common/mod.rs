//! In-memory PDF fixtures with correct cross-reference offsets.

#![allow(dead_code)]

/// Builds a classic-xref PDF from numbered objects. Object ids must be
/// contiguous from 1 so the table stays a single section.
pub struct PdfBuilder {
    objects: Vec<(u32, Vec<u8>)>,
    trailer_extra: String,
}

impl PdfBuilder {
    pub fn new() -> Self {
        Self {
            objects: Vec::new(),
            trailer_extra: String::new(),
        }
    }

    pub fn object(mut self, id: u32, body: &str) -> Self {
        self.objects.push((id, body.as_bytes().to_vec()));
        self
    }

    /// A stream object; /Length is filled in from the data.
    pub fn stream(mut self, id: u32, dict_entries: &str, data: &[u8]) -> Self {
        let mut body =
            format!("<< {dict_entries} /Length {} >>\nstream\n", data.len()).into_bytes();
        body.extend_from_slice(data);
        body.extend_from_slice(b"\nendstream");
        self.objects.push((id, body));
        self
    }

    /// Extra trailer entries, e.g. "/Info 6 0 R".
    pub fn trailer(mut self, entries: &str) -> Self {
        self.trailer_extra.push(' ');
        self.trailer_extra.push_str(entries);
        self
    }

    pub fn build(mut self, root: u32) -> Vec<u8> {
        self.objects.sort_by_key(|(id, _)| *id);
        assert!(
            self.objects
                .iter()
                .enumerate()
                .all(|(i, (id, _))| *id == i as u32 + 1),
            "object ids must be contiguous from 1"
        );
        let count = self.objects.len() as u32;

        let mut out = b"%PDF-1.7\n".to_vec();
        let mut offsets = Vec::with_capacity(self.objects.len());
        for (id, body) in &self.objects {
            offsets.push(out.len());
            out.extend_from_slice(format!("{id} 0 obj\n").as_bytes());
            out.extend_from_slice(body);
            out.extend_from_slice(b"\nendobj\n");
        }
        let xref_pos = out.len();
        out.extend_from_slice(format!("xref\n0 {}\n", count + 1).as_bytes());
        out.extend_from_slice(b"0000000000 65535 f \n");
        for offset in &offsets {
            out.extend_from_slice(format!("{offset:010} 00000 n \n").as_bytes());
        }
        out.extend_from_slice(
            format!(
                "trailer\n<< /Size {} /Root {root} 0 R{} >>\nstartxref\n{xref_pos}\n%%EOF\n",
                count + 1,
                self.trailer_extra
            )
            .as_bytes(),
        );
        out
    }
}

/// The standard single-page skeleton: catalog 1, pages 2, page 3,
/// contents 4, and a /F1 Type1 font 5 whose space glyph is 250 wide.
pub fn page_skeleton(content: &[u8], page_extra: &str, resources_extra: &str) -> PdfBuilder {
    PdfBuilder::new()
        .object(1, "<< /Type /Catalog /Pages 2 0 R >>")
        .object(2, "<< /Type /Pages /Kids [3 0 R] /Count 1 >>")
        .object(
            3,
            &format!(
                "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R \
                 /Resources << /Font << /F1 5 0 R >> {resources_extra} >> {page_extra} >>"
            ),
        )
        .stream(4, "", content)
        .object(
            5,
            "<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica \
             /FirstChar 32 /Widths [250] >>",
        )
}

/// One page with the given content stream.
pub fn single_page_pdf(content: &[u8]) -> Vec<u8> {
    page_skeleton(content, "", "").build(1)
}
