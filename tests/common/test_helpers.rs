use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub const ORDER_NS: &str = "urn:example:order";
pub const CUSTOMER_NS: &str = "urn:example:customer";

pub const ORDER_XSD: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema"
           targetNamespace="urn:example:order"
           xmlns="urn:example:order"
           elementFormDefault="qualified">
    <xs:element name="order">
        <xs:complexType>
            <xs:sequence>
                <xs:element name="item" type="xs:string" maxOccurs="unbounded"/>
            </xs:sequence>
            <xs:attribute name="id" type="xs:positiveInteger" use="required"/>
        </xs:complexType>
    </xs:element>
</xs:schema>"#;

pub const CUSTOMER_XSD: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema"
           targetNamespace="urn:example:customer"
           elementFormDefault="qualified">
    <xs:element name="customer" type="xs:string"/>
</xs:schema>"#;

pub const NOTE_XSD: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
    <xs:element name="note" type="xs:string"/>
</xs:schema>"#;

pub const VALID_ORDER: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<order xmlns="urn:example:order" id="7"><item>pen</item><item>ink</item></order>"#;

pub const INVALID_ORDER: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<order xmlns="urn:example:order" id="0"><price>3</price></order>"#;

pub const VALID_CUSTOMER: &str =
    r#"<customer xmlns="urn:example:customer">Ada Lovelace</customer>"#;

/// Temporary directory holding the schema documents above
pub struct SchemaFixtures {
    pub dir: TempDir,
}

impl SchemaFixtures {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("order.xsd"), ORDER_XSD).unwrap();
        std::fs::write(dir.path().join("customer.xsd"), CUSTOMER_XSD).unwrap();
        std::fs::write(dir.path().join("note.xsd"), NOTE_XSD).unwrap();
        Self { dir }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Write an instance document next to the schemas
    pub fn write(&self, name: &str, content: &str) -> PathBuf {
        let path = self.path(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }
}
