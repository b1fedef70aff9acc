//! Resource kinds and their behavior tables.
//!
//! Every manageable entity type is a variant of [`ResourceKind`]. Behavior
//! that differs between kinds (schema, naming, identifiers, region scoping,
//! tagging, teardown order) is expressed as exhaustive matches here, so adding
//! a kind forces every table to be filled in.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::api::RemoteObject;
use crate::error::ReconcileError;
use crate::schema::{Attribute, AttributeType, KindSchema};

/// DNS record types managed as separate Route53 kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RecordType {
    /// IPv4 address record.
    A,
    /// IPv6 address record.
    Aaaa,
    /// Canonical name record.
    Cname,
    /// Mail exchange record.
    Mx,
    /// Name server record.
    Ns,
    /// Pointer record.
    Ptr,
    /// Sender policy framework record.
    Spf,
    /// Service locator record.
    Srv,
    /// Text record.
    Txt,
}

impl RecordType {
    /// Every record type, in declaration order.
    pub const ALL: [RecordType; 9] = [
        RecordType::A,
        RecordType::Aaaa,
        RecordType::Cname,
        RecordType::Mx,
        RecordType::Ns,
        RecordType::Ptr,
        RecordType::Spf,
        RecordType::Srv,
        RecordType::Txt,
    ];

    /// The record type as it appears on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordType::A => "A",
            RecordType::Aaaa => "AAAA",
            RecordType::Cname => "CNAME",
            RecordType::Mx => "MX",
            RecordType::Ns => "NS",
            RecordType::Ptr => "PTR",
            RecordType::Spf => "SPF",
            RecordType::Srv => "SRV",
            RecordType::Txt => "TXT",
        }
    }
}

/// A manageable entity type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum ResourceKind {
    /// EC2 instance.
    Instance,
    /// EC2 security group.
    SecurityGroup,
    /// Classic elastic load balancer.
    LoadBalancer,
    /// VPC.
    Vpc,
    /// VPC subnet.
    Subnet,
    /// VPC internet gateway.
    InternetGateway,
    /// VPC route table.
    RouteTable,
    /// EBS volume.
    Volume,
    /// IAM user.
    IamUser,
    /// Route53 hosted zone.
    Route53Zone,
    /// Route53 record set of one record type.
    Route53Record(RecordType),
}

/// Where a remote object's name comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameSource {
    /// A tag value (EC2 objects are named by their `Name` tag).
    Tag(&'static str),
    /// A top-level property of the remote object.
    Field(&'static str),
}

/// A dependent relationship that must be unwound before delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relation {
    /// An instance registered with a load balancer.
    RegisteredInstance,
    /// A VPC an internet gateway is attached to.
    VpcAttachment,
    /// A subnet associated with a route table.
    SubnetAssociation,
    /// An instance a volume is attached to.
    InstanceAttachment,
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Relation::RegisteredInstance => write!(f, "registered instance"),
            Relation::VpcAttachment => write!(f, "vpc attachment"),
            Relation::SubnetAssociation => write!(f, "subnet association"),
            Relation::InstanceAttachment => write!(f, "instance attachment"),
        }
    }
}

/// One step of a kind's teardown order: the relation to unwind and the
/// property of the remote object that lists its targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TeardownRelation {
    /// The relation to detach.
    pub relation: Relation,
    /// Property holding the dependent identifier(s).
    pub property: &'static str,
}

const NAME_TAG: NameSource = NameSource::Tag("Name");

impl ResourceKind {
    /// Every kind, including one Route53 record kind per record type.
    pub fn all() -> Vec<ResourceKind> {
        let mut kinds = vec![
            ResourceKind::Instance,
            ResourceKind::SecurityGroup,
            ResourceKind::LoadBalancer,
            ResourceKind::Vpc,
            ResourceKind::Subnet,
            ResourceKind::InternetGateway,
            ResourceKind::RouteTable,
            ResourceKind::Volume,
            ResourceKind::IamUser,
            ResourceKind::Route53Zone,
        ];
        kinds.extend(RecordType::ALL.into_iter().map(ResourceKind::Route53Record));
        kinds
    }

    /// The stable type name used by desired-state sources.
    pub fn type_name(&self) -> &'static str {
        match self {
            ResourceKind::Instance => "ec2_instance",
            ResourceKind::SecurityGroup => "ec2_securitygroup",
            ResourceKind::LoadBalancer => "elb_loadbalancer",
            ResourceKind::Vpc => "ec2_vpc",
            ResourceKind::Subnet => "ec2_vpc_subnet",
            ResourceKind::InternetGateway => "ec2_vpc_internet_gateway",
            ResourceKind::RouteTable => "ec2_vpc_routetable",
            ResourceKind::Volume => "ec2_volume",
            ResourceKind::IamUser => "iam_user",
            ResourceKind::Route53Zone => "route53_zone",
            ResourceKind::Route53Record(record) => match record {
                RecordType::A => "route53_a_record",
                RecordType::Aaaa => "route53_aaaa_record",
                RecordType::Cname => "route53_cname_record",
                RecordType::Mx => "route53_mx_record",
                RecordType::Ns => "route53_ns_record",
                RecordType::Ptr => "route53_ptr_record",
                RecordType::Spf => "route53_spf_record",
                RecordType::Srv => "route53_srv_record",
                RecordType::Txt => "route53_txt_record",
            },
        }
    }

    /// Whether objects of this kind live in a region. Global kinds are
    /// matched by name alone.
    pub fn is_region_scoped(&self) -> bool {
        match self {
            ResourceKind::Instance
            | ResourceKind::SecurityGroup
            | ResourceKind::LoadBalancer
            | ResourceKind::Vpc
            | ResourceKind::Subnet
            | ResourceKind::InternetGateway
            | ResourceKind::RouteTable
            | ResourceKind::Volume => true,
            ResourceKind::IamUser | ResourceKind::Route53Zone | ResourceKind::Route53Record(_) => {
                false
            },
        }
    }

    /// Where the name of a remote object is read from.
    pub fn name_source(&self) -> NameSource {
        match self {
            ResourceKind::Instance
            | ResourceKind::Vpc
            | ResourceKind::Subnet
            | ResourceKind::InternetGateway
            | ResourceKind::RouteTable
            | ResourceKind::Volume => NAME_TAG,
            ResourceKind::SecurityGroup => NameSource::Field("group_name"),
            ResourceKind::LoadBalancer => NameSource::Field("load_balancer_name"),
            ResourceKind::IamUser => NameSource::Field("user_name"),
            ResourceKind::Route53Zone | ResourceKind::Route53Record(_) => {
                NameSource::Field("name")
            },
        }
    }

    /// Provider-assigned identifier properties besides the primary id.
    pub fn identifier_keys(&self) -> &'static [&'static str] {
        match self {
            ResourceKind::LoadBalancer => &["dns_name"],
            ResourceKind::IamUser => &["arn", "user_id"],
            ResourceKind::Route53Zone => &["caller_reference"],
            ResourceKind::Instance
            | ResourceKind::SecurityGroup
            | ResourceKind::Vpc
            | ResourceKind::Subnet
            | ResourceKind::InternetGateway
            | ResourceKind::RouteTable
            | ResourceKind::Volume
            | ResourceKind::Route53Record(_) => &[],
        }
    }

    /// Whether tags are applied by a separate call once the object exists.
    ///
    /// The EC2 create calls do not take tags, and the new identifier may not
    /// be visible to the tagging endpoint right away.
    pub fn tags_after_create(&self) -> bool {
        match self {
            ResourceKind::Instance
            | ResourceKind::SecurityGroup
            | ResourceKind::Vpc
            | ResourceKind::Subnet
            | ResourceKind::InternetGateway
            | ResourceKind::RouteTable
            | ResourceKind::Volume => true,
            ResourceKind::LoadBalancer
            | ResourceKind::IamUser
            | ResourceKind::Route53Zone
            | ResourceKind::Route53Record(_) => false,
        }
    }

    /// Dependents to detach before delete, in the order they must be unwound.
    pub fn teardown_relations(&self) -> &'static [TeardownRelation] {
        match self {
            ResourceKind::LoadBalancer => &[TeardownRelation {
                relation: Relation::RegisteredInstance,
                property: "instances",
            }],
            ResourceKind::InternetGateway => &[TeardownRelation {
                relation: Relation::VpcAttachment,
                property: "vpc",
            }],
            ResourceKind::RouteTable => &[TeardownRelation {
                relation: Relation::SubnetAssociation,
                property: "subnets",
            }],
            ResourceKind::Volume => &[TeardownRelation {
                relation: Relation::InstanceAttachment,
                property: "instance",
            }],
            ResourceKind::Instance
            | ResourceKind::SecurityGroup
            | ResourceKind::Vpc
            | ResourceKind::Subnet
            | ResourceKind::IamUser
            | ResourceKind::Route53Zone
            | ResourceKind::Route53Record(_) => &[],
        }
    }

    /// Whether a listed object is on its way out and should not count as
    /// present.
    pub fn is_gone(&self, object: &RemoteObject) -> bool {
        let state = object.property("state").and_then(|v| v.as_str());
        match self {
            ResourceKind::Instance => matches!(state, Some("terminated" | "shutting-down")),
            ResourceKind::Volume => matches!(state, Some("deleting" | "deleted")),
            _ => false,
        }
    }

    /// The attribute schema for this kind.
    pub fn schema(&self) -> KindSchema {
        match self {
            ResourceKind::Instance => KindSchema::new()
                .with_attribute("image_id", Attribute::required_string().fixed())
                .with_attribute("instance_type", Attribute::required_string().fixed())
                .with_attribute("availability_zone", Attribute::optional_string().fixed())
                .with_attribute("subnet", Attribute::optional_string().fixed())
                .with_attribute("key_name", Attribute::optional_string().fixed())
                .with_attribute("ebs_optimized", Attribute::optional_bool().fixed())
                .with_attribute(
                    "security_groups",
                    Attribute::optional(AttributeType::string_set()),
                )
                .with_attribute("monitoring", Attribute::optional_bool())
                .with_attribute("user_data", Attribute::optional_string().write_only())
                .with_attribute("tags", Attribute::tags())
                .with_attribute("state", Attribute::computed_string())
                .with_attribute("private_ip_address", Attribute::computed_string())
                .with_attribute("public_ip_address", Attribute::computed_string()),
            ResourceKind::SecurityGroup => KindSchema::new()
                .with_attribute("description", Attribute::optional_string().fixed())
                .with_attribute("vpc", Attribute::optional_string().fixed())
                .with_attribute(
                    "ingress",
                    Attribute::optional(AttributeType::set(ingress_rule())),
                )
                .with_attribute("tags", Attribute::tags()),
            ResourceKind::LoadBalancer => KindSchema::new()
                .with_attribute(
                    "listeners",
                    Attribute::required(AttributeType::set(listener())).fixed(),
                )
                .with_attribute("scheme", Attribute::optional_string().fixed())
                .with_attribute(
                    "subnets",
                    Attribute::optional(AttributeType::string_set()).fixed(),
                )
                .with_attribute(
                    "availability_zones",
                    Attribute::optional(AttributeType::string_set()),
                )
                .with_attribute(
                    "security_groups",
                    Attribute::optional(AttributeType::string_set()),
                )
                .with_attribute(
                    "instances",
                    Attribute::optional(AttributeType::string_set()),
                )
                .with_attribute("tags", Attribute::tags()),
            ResourceKind::Vpc => KindSchema::new()
                .with_attribute("cidr_block", Attribute::required_string().fixed())
                .with_attribute("instance_tenancy", Attribute::optional_string().fixed())
                .with_attribute("dhcp_options", Attribute::optional_string())
                .with_attribute("tags", Attribute::tags()),
            ResourceKind::Subnet => KindSchema::new()
                .with_attribute("vpc", Attribute::required_string().fixed())
                .with_attribute("cidr_block", Attribute::required_string().fixed())
                .with_attribute("availability_zone", Attribute::optional_string().fixed())
                .with_attribute("route_table", Attribute::optional_string())
                .with_attribute("tags", Attribute::tags()),
            ResourceKind::InternetGateway => KindSchema::new()
                .with_attribute("vpc", Attribute::optional_string())
                .with_attribute("tags", Attribute::tags()),
            ResourceKind::RouteTable => KindSchema::new()
                .with_attribute("vpc", Attribute::required_string().fixed())
                .with_attribute(
                    "routes",
                    Attribute::optional(AttributeType::set(route())).fixed(),
                )
                .with_attribute("subnets", Attribute::optional(AttributeType::string_set()))
                .with_attribute("tags", Attribute::tags()),
            ResourceKind::Volume => KindSchema::new()
                .with_attribute("availability_zone", Attribute::required_string().fixed())
                .with_attribute("size", Attribute::optional_int64().fixed())
                .with_attribute("volume_type", Attribute::optional_string().fixed())
                .with_attribute("snapshot_id", Attribute::optional_string().fixed())
                .with_attribute("iops", Attribute::optional_int64().fixed())
                .with_attribute("encrypted", Attribute::optional_bool().fixed())
                .with_attribute("instance", Attribute::optional_string())
                .with_attribute("tags", Attribute::tags())
                .with_attribute("state", Attribute::computed_string()),
            ResourceKind::IamUser => KindSchema::new()
                .with_attribute("path", Attribute::optional_string()),
            ResourceKind::Route53Zone => KindSchema::new()
                .with_attribute("comment", Attribute::optional_string())
                .with_attribute("private", Attribute::optional_bool().fixed()),
            ResourceKind::Route53Record(_) => KindSchema::new()
                .with_attribute("zone", Attribute::required_string().fixed())
                .with_attribute("ttl", Attribute::required(AttributeType::Int64))
                .with_attribute(
                    "values",
                    Attribute::required(AttributeType::string_set()),
                ),
        }
    }
}

fn ingress_rule() -> AttributeType {
    AttributeType::object([
        ("protocol", AttributeType::String),
        ("from_port", AttributeType::Int64),
        ("to_port", AttributeType::Int64),
        ("cidr", AttributeType::String),
        ("security_group", AttributeType::String),
    ])
}

fn listener() -> AttributeType {
    AttributeType::object([
        ("protocol", AttributeType::String),
        ("load_balancer_port", AttributeType::Int64),
        ("instance_protocol", AttributeType::String),
        ("instance_port", AttributeType::Int64),
    ])
}

fn route() -> AttributeType {
    AttributeType::object([
        ("destination_cidr_block", AttributeType::String),
        ("gateway", AttributeType::String),
    ])
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

impl FromStr for ResourceKind {
    type Err = ReconcileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ResourceKind::all()
            .into_iter()
            .find(|kind| kind.type_name() == s)
            .ok_or_else(|| ReconcileError::UnknownKind(s.to_string()))
    }
}

impl From<ResourceKind> for String {
    fn from(kind: ResourceKind) -> Self {
        kind.type_name().to_string()
    }
}

impl TryFrom<String> for ResourceKind {
    type Error = ReconcileError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_names_round_trip() {
        for kind in ResourceKind::all() {
            let parsed: ResourceKind = kind.type_name().parse().unwrap();
            assert_eq!(parsed, kind);
        }
        assert_eq!(ResourceKind::all().len(), 19);
    }

    #[test]
    fn test_unknown_type_name() {
        let err = "ec2_spaceship".parse::<ResourceKind>().unwrap_err();
        assert!(matches!(err, ReconcileError::UnknownKind(name) if name == "ec2_spaceship"));
    }

    #[test]
    fn test_region_scoping() {
        assert!(ResourceKind::SecurityGroup.is_region_scoped());
        assert!(ResourceKind::Volume.is_region_scoped());
        assert!(!ResourceKind::IamUser.is_region_scoped());
        assert!(!ResourceKind::Route53Record(RecordType::Cname).is_region_scoped());
    }

    #[test]
    fn test_read_only_attributes() {
        let schema = ResourceKind::Instance.schema();
        let fixed: Vec<_> = schema.read_only_keys().collect();
        assert!(fixed.contains(&"image_id"));
        assert!(fixed.contains(&"instance_type"));
        assert!(!fixed.contains(&"tags"));
        assert!(!fixed.contains(&"security_groups"));

        let schema = ResourceKind::Route53Record(RecordType::A).schema();
        assert!(schema.attribute("zone").unwrap().read_only);
        assert!(!schema.attribute("ttl").unwrap().read_only);
    }

    #[test]
    fn test_teardown_relations() {
        let steps = ResourceKind::InternetGateway.teardown_relations();
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].relation, Relation::VpcAttachment);
        assert!(ResourceKind::Vpc.teardown_relations().is_empty());
    }

    #[test]
    fn test_name_sources() {
        assert_eq!(ResourceKind::Vpc.name_source(), NameSource::Tag("Name"));
        assert_eq!(
            ResourceKind::IamUser.name_source(),
            NameSource::Field("user_name")
        );
    }

    #[test]
    fn test_is_gone() {
        let terminated = RemoteObject::new("i-1").with_property("state", "terminated");
        let running = RemoteObject::new("i-2").with_property("state", "running");
        assert!(ResourceKind::Instance.is_gone(&terminated));
        assert!(!ResourceKind::Instance.is_gone(&running));
        assert!(!ResourceKind::Vpc.is_gone(&terminated));
    }

    #[test]
    fn test_kind_serde() {
        let kind = ResourceKind::Route53Record(RecordType::Txt);
        let value = serde_json::to_value(kind).unwrap();
        assert_eq!(value, serde_json::json!("route53_txt_record"));
        let back: ResourceKind = serde_json::from_value(value).unwrap();
        assert_eq!(back, kind);
    }
}
